//! Migration operations.
//!
//! Schema-diff tooling works on reversible operations. This module
//! defines the geospatial variants of the generic column, table and
//! index operations: a rewriter upgrades generic operations when a
//! spatial column is involved, rendering produces the migration-script
//! call with the geospatial name, and execution dispatches on the live
//! connection's dialect (PostGIS columns go through plain ALTER TABLE,
//! the SpatiaLite family through its registration functions).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::connection::SpatialConnection;
use crate::core::schema::{spatial_index_name, Column, ColumnType, Index, Table};
use crate::core::traits::DialectStrategy;
use crate::dialects::{select_strategy, DialectKind};
use crate::error::{GeoDdlError, Result};
use crate::events::SpatialDdl;

/// Generic add-column operation, upgraded by [`MigrationOp::rewrite`]
/// when the column is spatial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddColumnOp {
    pub schema: Option<String>,
    pub table_name: String,
    pub column: Column,
}

/// Generic drop-column operation. Carries the full column definition so
/// the operation can be reversed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropColumnOp {
    pub schema: Option<String>,
    pub table_name: String,
    pub column: Column,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTableOp {
    pub table: Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropTableOp {
    pub table: Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateIndexOp {
    pub schema: Option<String>,
    pub table_name: String,
    pub index: Index,
    /// Definitions of the indexed columns, needed to recognize spatial
    /// indexes during rewriting.
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropIndexOp {
    pub schema: Option<String>,
    pub table_name: String,
    pub index: Index,
    pub columns: Vec<Column>,
}

/// A spatial column addition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddGeospatialColumnOp {
    pub schema: Option<String>,
    pub table_name: String,
    pub column: Column,
}

/// A spatial column removal. Carries the full column definition so
/// `reverse()` can rebuild the addition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropGeospatialColumnOp {
    pub schema: Option<String>,
    pub table_name: String,
    pub column: Column,
}

impl DropGeospatialColumnOp {
    pub fn column_name(&self) -> &str {
        &self.column.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateGeospatialTableOp {
    pub table: Table,
}

impl CreateGeospatialTableOp {
    /// Table handed to the DDL lifecycle. Spatial index requests are
    /// cleared so indexes are only created by their own operations.
    pub fn to_table(&self) -> Table {
        let mut table = self.table.clone();
        let spatial_cols: Vec<String> = table
            .spatial_columns()
            .map(|c| c.name.clone())
            .collect();
        for column in table.columns.iter_mut() {
            if let Some(ty) = column.spatial_type_mut() {
                ty.spatial_index = false;
            }
        }
        table.indexes.retain(|idx| {
            !spatial_cols
                .iter()
                .any(|col| idx.name == spatial_index_name(&table.name, col) && idx.covers(col))
        });
        table
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropGeospatialTableOp {
    pub table: Table,
}

/// A spatial index creation; always a single indexed column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateGeospatialIndexOp {
    pub schema: Option<String>,
    pub table_name: String,
    pub index: Index,
    pub column: Column,
}

/// A spatial index removal. The column definition rides along so the
/// SpatiaLite family can address its shadow tables and `reverse()` can
/// rebuild the creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropGeospatialIndexOp {
    pub schema: Option<String>,
    pub table_name: String,
    pub index: Index,
    pub column: Column,
}

impl DropGeospatialIndexOp {
    pub fn column_name(&self) -> &str {
        &self.column.name
    }
}

/// One migration operation, generic or geospatial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MigrationOp {
    AddColumn(AddColumnOp),
    DropColumn(DropColumnOp),
    CreateTable(CreateTableOp),
    DropTable(DropTableOp),
    CreateIndex(CreateIndexOp),
    DropIndex(DropIndexOp),
    AddGeospatialColumn(AddGeospatialColumnOp),
    DropGeospatialColumn(DropGeospatialColumnOp),
    CreateGeospatialTable(CreateGeospatialTableOp),
    DropGeospatialTable(DropGeospatialTableOp),
    CreateGeospatialIndex(CreateGeospatialIndexOp),
    DropGeospatialIndex(DropGeospatialIndexOp),
}

fn single_spatial_column(columns: &[Column], index: &Index) -> Option<Column> {
    if index.columns.len() != 1 {
        return None;
    }
    columns
        .iter()
        .find(|c| c.name == index.columns[0] && c.is_spatial())
        .cloned()
}

impl MigrationOp {
    /// Upgrade a generic operation to its geospatial variant when a
    /// spatial column or index is involved. Non-spatial operations pass
    /// through unchanged.
    pub fn rewrite(self) -> MigrationOp {
        match self {
            MigrationOp::AddColumn(mut op) => {
                if op.column.is_spatial() {
                    if let Some(ty) = op.column.spatial_type_mut() {
                        // Index creation is driven by its own operation.
                        ty.spatial_index = false;
                        ty.spatial_index_reflected = None;
                    }
                    MigrationOp::AddGeospatialColumn(AddGeospatialColumnOp {
                        schema: op.schema,
                        table_name: op.table_name,
                        column: op.column,
                    })
                } else {
                    MigrationOp::AddColumn(op)
                }
            }
            MigrationOp::DropColumn(op) => {
                if op.column.is_spatial() {
                    MigrationOp::DropGeospatialColumn(DropGeospatialColumnOp {
                        schema: op.schema,
                        table_name: op.table_name,
                        column: op.column,
                    })
                } else {
                    MigrationOp::DropColumn(op)
                }
            }
            MigrationOp::CreateTable(op) => {
                if op.table.spatial_columns().next().is_some() {
                    MigrationOp::CreateGeospatialTable(CreateGeospatialTableOp { table: op.table })
                } else {
                    MigrationOp::CreateTable(op)
                }
            }
            MigrationOp::DropTable(op) => {
                if op.table.spatial_columns().next().is_some() {
                    MigrationOp::DropGeospatialTable(DropGeospatialTableOp { table: op.table })
                } else {
                    MigrationOp::DropTable(op)
                }
            }
            MigrationOp::CreateIndex(mut op) => {
                match single_spatial_column(&op.columns, &op.index) {
                    Some(column) => {
                        // Fix the index properties for the GiST path.
                        op.index.using_gist = true;
                        op.index.nd_ops = column
                            .spatial_type()
                            .map(|t| t.use_nd_index)
                            .unwrap_or(false);
                        MigrationOp::CreateGeospatialIndex(CreateGeospatialIndexOp {
                            schema: op.schema,
                            table_name: op.table_name,
                            index: op.index,
                            column,
                        })
                    }
                    None => MigrationOp::CreateIndex(op),
                }
            }
            MigrationOp::DropIndex(op) => match single_spatial_column(&op.columns, &op.index) {
                Some(column) => MigrationOp::DropGeospatialIndex(DropGeospatialIndexOp {
                    schema: op.schema,
                    table_name: op.table_name,
                    index: op.index,
                    column,
                }),
                None => MigrationOp::DropIndex(op),
            },
            other => other,
        }
    }

    /// Operation undoing this one. `op.reverse().reverse() == op`.
    pub fn reverse(&self) -> MigrationOp {
        match self {
            MigrationOp::AddColumn(op) => MigrationOp::DropColumn(DropColumnOp {
                schema: op.schema.clone(),
                table_name: op.table_name.clone(),
                column: op.column.clone(),
            }),
            MigrationOp::DropColumn(op) => MigrationOp::AddColumn(AddColumnOp {
                schema: op.schema.clone(),
                table_name: op.table_name.clone(),
                column: op.column.clone(),
            }),
            MigrationOp::CreateTable(op) => MigrationOp::DropTable(DropTableOp {
                table: op.table.clone(),
            }),
            MigrationOp::DropTable(op) => MigrationOp::CreateTable(CreateTableOp {
                table: op.table.clone(),
            }),
            MigrationOp::CreateIndex(op) => MigrationOp::DropIndex(DropIndexOp {
                schema: op.schema.clone(),
                table_name: op.table_name.clone(),
                index: op.index.clone(),
                columns: op.columns.clone(),
            }),
            MigrationOp::DropIndex(op) => MigrationOp::CreateIndex(CreateIndexOp {
                schema: op.schema.clone(),
                table_name: op.table_name.clone(),
                index: op.index.clone(),
                columns: op.columns.clone(),
            }),
            MigrationOp::AddGeospatialColumn(op) => {
                MigrationOp::DropGeospatialColumn(DropGeospatialColumnOp {
                    schema: op.schema.clone(),
                    table_name: op.table_name.clone(),
                    column: op.column.clone(),
                })
            }
            MigrationOp::DropGeospatialColumn(op) => {
                MigrationOp::AddGeospatialColumn(AddGeospatialColumnOp {
                    schema: op.schema.clone(),
                    table_name: op.table_name.clone(),
                    column: op.column.clone(),
                })
            }
            MigrationOp::CreateGeospatialTable(op) => {
                MigrationOp::DropGeospatialTable(DropGeospatialTableOp {
                    table: op.table.clone(),
                })
            }
            MigrationOp::DropGeospatialTable(op) => {
                MigrationOp::CreateGeospatialTable(CreateGeospatialTableOp {
                    table: op.table.clone(),
                })
            }
            MigrationOp::CreateGeospatialIndex(op) => {
                MigrationOp::DropGeospatialIndex(DropGeospatialIndexOp {
                    schema: op.schema.clone(),
                    table_name: op.table_name.clone(),
                    index: op.index.clone(),
                    column: op.column.clone(),
                })
            }
            MigrationOp::DropGeospatialIndex(op) => {
                MigrationOp::CreateGeospatialIndex(CreateGeospatialIndexOp {
                    schema: op.schema.clone(),
                    table_name: op.table_name.clone(),
                    index: op.index.clone(),
                    column: op.column.clone(),
                })
            }
        }
    }

    /// Migration-script call for this operation. Geospatial variants
    /// rewrite the generic call name.
    pub fn render(&self) -> String {
        match self {
            MigrationOp::AddColumn(op) => render_add_column(op),
            MigrationOp::DropColumn(op) => render_drop_column(op),
            MigrationOp::CreateTable(op) => render_create_table(&op.table),
            MigrationOp::DropTable(op) => render_drop_table(&op.table),
            MigrationOp::CreateIndex(op) => {
                render_create_index(&op.index, &op.table_name)
            }
            MigrationOp::DropIndex(op) => render_drop_index(&op.index, &op.table_name),
            MigrationOp::AddGeospatialColumn(op) => render_add_column(&AddColumnOp {
                schema: op.schema.clone(),
                table_name: op.table_name.clone(),
                column: op.column.clone(),
            })
            .replace(".add_column(", ".add_geospatial_column("),
            MigrationOp::DropGeospatialColumn(op) => render_drop_column(&DropColumnOp {
                schema: op.schema.clone(),
                table_name: op.table_name.clone(),
                column: op.column.clone(),
            })
            .replace(".drop_column(", ".drop_geospatial_column("),
            MigrationOp::CreateGeospatialTable(op) => render_create_table(&op.table)
                .replace(".create_table(", ".create_geospatial_table("),
            MigrationOp::DropGeospatialTable(op) => {
                render_drop_table(&op.table).replace(".drop_table(", ".drop_geospatial_table(")
            }
            MigrationOp::CreateGeospatialIndex(op) => {
                render_create_index(&op.index, &op.table_name)
                    .replace(".create_index(", ".create_geospatial_index(")
            }
            MigrationOp::DropGeospatialIndex(op) => {
                let base = render_drop_index(&op.index, &op.table_name)
                    .replace(".drop_index(", ".drop_geospatial_index(");
                // The column name is needed to rebuild the index on
                // downgrade.
                format!(
                    "{}, column_name=\"{}\")",
                    &base[..base.len() - 1],
                    op.column_name()
                )
            }
        }
    }

    /// Import lines the rendered call needs. Spatial operations pull in
    /// the spatial type constructors.
    pub fn render_imports(&self) -> Vec<&'static str> {
        match self {
            MigrationOp::AddGeospatialColumn(_)
            | MigrationOp::DropGeospatialColumn(_)
            | MigrationOp::CreateGeospatialTable(_)
            | MigrationOp::DropGeospatialTable(_) => {
                vec!["use geo_ddl::types::SpatialType;"]
            }
            _ => Vec::new(),
        }
    }

    /// Run the operation against a live connection.
    pub async fn execute(&self, conn: &dyn SpatialConnection, ddl: &SpatialDdl) -> Result<()> {
        let kind = conn.dialect();
        debug!(dialect = kind.as_str(), op = ?std::mem::discriminant(self), "executing migration op");
        match self {
            MigrationOp::AddColumn(op) => {
                conn.execute(&add_column_sql(kind, op.schema.as_deref(), &op.table_name, &op.column))
                    .await?;
                Ok(())
            }
            MigrationOp::DropColumn(op) => {
                conn.execute(&drop_column_sql(
                    kind,
                    op.schema.as_deref(),
                    &op.table_name,
                    &op.column.name,
                ))
                .await?;
                Ok(())
            }
            MigrationOp::CreateTable(op) => {
                let mut table = op.table.clone();
                ddl.create_table(&mut table, conn).await
            }
            MigrationOp::DropTable(op) => {
                let mut table = op.table.clone();
                ddl.drop_table(&mut table, conn).await
            }
            MigrationOp::CreateIndex(op) => {
                let table = index_target(op.schema.clone(), &op.table_name);
                conn.execute(&op.index.create_sql(&table, kind)).await?;
                Ok(())
            }
            MigrationOp::DropIndex(op) => {
                conn.execute(&format!(
                    "DROP INDEX {}",
                    kind.quote_ident(&op.index.name)
                ))
                .await?;
                Ok(())
            }
            MigrationOp::AddGeospatialColumn(op) => {
                self.execute_add_geospatial(conn, kind, op).await
            }
            MigrationOp::DropGeospatialColumn(op) => {
                self.execute_drop_geospatial(conn, kind, op).await
            }
            MigrationOp::CreateGeospatialTable(op) => {
                let mut table = op.to_table();
                ddl.create_table(&mut table, conn).await
            }
            MigrationOp::DropGeospatialTable(op) => {
                let mut table = op.table.clone();
                ddl.drop_table(&mut table, conn).await
            }
            MigrationOp::CreateGeospatialIndex(op) => {
                let strategy = select_strategy(kind);
                let table = index_target(op.schema.clone(), &op.table_name);
                strategy.create_spatial_index(conn, &table, &op.column).await
            }
            MigrationOp::DropGeospatialIndex(op) => {
                let strategy = select_strategy(kind);
                let table = index_target(op.schema.clone(), &op.table_name);
                strategy
                    .drop_spatial_index(conn, &table, op.column_name())
                    .await
            }
        }
    }

    async fn execute_add_geospatial(
        &self,
        conn: &dyn SpatialConnection,
        kind: DialectKind,
        op: &AddGeospatialColumnOp,
    ) -> Result<()> {
        let ty = op.column.spatial_type().ok_or_else(|| {
            GeoDdlError::argument(format!("column {} is not spatial", op.column.name))
        })?;
        if kind.is_sqlite_family() {
            conn.query_scalar(&format!(
                "SELECT AddGeometryColumn('{}', '{}', {}, '{}', {}, {})",
                op.table_name,
                op.column.name,
                ty.srid,
                ty.geometry_type.as_deref().unwrap_or("GEOMETRY"),
                ty.dimension.unwrap_or(2),
                u8::from(!ty.nullable),
            ))
            .await?;
        } else {
            conn.execute(&add_column_sql(
                kind,
                op.schema.as_deref(),
                &op.table_name,
                &op.column,
            ))
            .await?;
        }
        if ty.spatial_index {
            let strategy = select_strategy(kind);
            let table = index_target(op.schema.clone(), &op.table_name);
            strategy
                .create_spatial_index(conn, &table, &op.column)
                .await?;
        }
        Ok(())
    }

    async fn execute_drop_geospatial(
        &self,
        conn: &dyn SpatialConnection,
        kind: DialectKind,
        op: &DropGeospatialColumnOp,
    ) -> Result<()> {
        let ty = op.column.spatial_type().ok_or_else(|| {
            GeoDdlError::argument(format!("column {} is not spatial", op.column.name))
        })?;
        // The index goes first so the column can be unregistered.
        if ty.spatial_index {
            let strategy = select_strategy(kind);
            let table = index_target(op.schema.clone(), &op.table_name);
            strategy
                .drop_spatial_index(conn, &table, op.column_name())
                .await?;
        }
        if kind.is_sqlite_family() {
            conn.query_scalar(&format!(
                "SELECT DiscardGeometryColumn('{}', '{}')",
                op.table_name,
                op.column.name
            ))
            .await?;
        }
        conn.execute(&drop_column_sql(
            kind,
            op.schema.as_deref(),
            &op.table_name,
            &op.column.name,
        ))
        .await?;
        Ok(())
    }
}

fn index_target(schema: Option<String>, table_name: &str) -> Table {
    let mut table = Table::new(table_name);
    table.schema = schema;
    table
}

fn qualified(kind: DialectKind, schema: Option<&str>, table_name: &str) -> String {
    match schema {
        Some(schema) => format!(
            "{}.{}",
            kind.quote_ident(schema),
            kind.quote_ident(table_name)
        ),
        None => kind.quote_ident(table_name),
    }
}

fn add_column_sql(
    kind: DialectKind,
    schema: Option<&str>,
    table_name: &str,
    column: &Column,
) -> String {
    let type_spec = match &column.ty {
        ColumnType::Plain(sql_type) => sql_type.clone(),
        ColumnType::Spatial(ty) => {
            if kind.is_mysql_family() {
                ty.mysql_col_spec(kind)
            } else {
                ty.col_spec()
            }
        }
    };
    let mut sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        qualified(kind, schema, table_name),
        kind.quote_ident(&column.name),
        type_spec
    );
    if !column.nullable && !(column.is_spatial() && kind.is_mysql_family()) {
        sql.push_str(" NOT NULL");
    }
    sql
}

fn drop_column_sql(
    kind: DialectKind,
    schema: Option<&str>,
    table_name: &str,
    column_name: &str,
) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        qualified(kind, schema, table_name),
        kind.quote_ident(column_name)
    )
}

fn render_column(column: &Column) -> String {
    match &column.ty {
        ColumnType::Plain(sql_type) => {
            format!("Column::plain(\"{}\", \"{}\")", column.name, sql_type)
        }
        ColumnType::Spatial(ty) => {
            format!("Column::spatial(\"{}\", \"{}\")", column.name, ty.col_spec())
        }
    }
}

fn render_add_column(op: &AddColumnOp) -> String {
    format!(
        "op.add_column(\"{}\", {})",
        op.table_name,
        render_column(&op.column)
    )
}

fn render_drop_column(op: &DropColumnOp) -> String {
    format!(
        "op.drop_column(\"{}\", \"{}\")",
        op.table_name, op.column.name
    )
}

fn render_create_table(table: &Table) -> String {
    let columns = table
        .columns
        .iter()
        .map(render_column)
        .collect::<Vec<_>>()
        .join(", ");
    format!("op.create_table(\"{}\", [{}])", table.name, columns)
}

fn render_drop_table(table: &Table) -> String {
    format!("op.drop_table(\"{}\")", table.name)
}

fn render_create_index(index: &Index, table_name: &str) -> String {
    let columns = index
        .columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "op.create_index(\"{}\", \"{}\", [{}])",
        index.name, table_name, columns
    )
}

fn render_drop_index(index: &Index, table_name: &str) -> String {
    format!("op.drop_index(\"{}\", \"{}\")", index.name, table_name)
}
