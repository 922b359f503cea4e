//! Table, column and index metadata.
//!
//! [`Table`] is the unit the DDL lifecycle works on. Attaching a
//! spatial column wires up nullability and the canonical spatial index
//! entry; the per-dialect strategies later strip, substitute and
//! restore columns around the generic CREATE/DROP statements through a
//! [`DdlScope`].

use serde::{Deserialize, Serialize};

use crate::dialects::DialectKind;
use crate::types::{SpatialBase, SpatialType};

/// Canonical name for the spatial index of a column.
pub fn spatial_index_name(table_name: &str, column_name: &str) -> String {
    format!("idx_{table_name}_{column_name}")
}

/// A column is either a plain SQL type, kept as its literal spelling,
/// or a spatial descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnType {
    Plain(String),
    Spatial(SpatialType),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Column {
            name: name.into(),
            ty,
            nullable: true,
            primary_key: false,
        }
    }

    /// Shorthand for a plain column.
    pub fn plain(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Column::new(name, ColumnType::Plain(sql_type.into()))
    }

    /// Shorthand for a spatial column.
    pub fn spatial(name: impl Into<String>, ty: SpatialType) -> Self {
        Column::new(name, ColumnType::Spatial(ty))
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn spatial_type(&self) -> Option<&SpatialType> {
        match &self.ty {
            ColumnType::Spatial(t) => Some(t),
            ColumnType::Plain(_) => None,
        }
    }

    pub fn spatial_type_mut(&mut self) -> Option<&mut SpatialType> {
        match &mut self.ty {
            ColumnType::Spatial(t) => Some(t),
            ColumnType::Plain(_) => None,
        }
    }

    pub fn is_spatial(&self) -> bool {
        matches!(self.ty, ColumnType::Spatial(_))
    }
}

/// An index entry in the table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    /// PostgreSQL: create the index USING gist.
    pub using_gist: bool,
    /// PostgreSQL: use the N-D operator class instead of the 2-D one.
    pub nd_ops: bool,
    /// PostgreSQL raster indexes wrap the column in ST_ConvexHull.
    pub raster_expression: bool,
}

impl Index {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Index {
            name: name.into(),
            columns,
            using_gist: false,
            nd_ops: false,
            raster_expression: false,
        }
    }

    pub fn covers(&self, column_name: &str) -> bool {
        self.columns.iter().any(|c| c == column_name)
    }

    /// CREATE INDEX statement for this entry.
    pub fn create_sql(&self, table: &Table, kind: DialectKind) -> String {
        let q = |ident: &str| kind.quote_ident(ident);
        let cols = self
            .columns
            .iter()
            .map(|c| {
                if self.raster_expression {
                    format!("ST_ConvexHull({})", q(c))
                } else if self.nd_ops {
                    format!("{} gist_geometry_ops_nd", q(c))
                } else {
                    q(c)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        // The gist markers only mean something to PostgreSQL.
        let using = if self.using_gist && kind == DialectKind::Postgres {
            " USING gist"
        } else {
            ""
        };
        format!(
            "CREATE INDEX {} ON {}{} ({})",
            q(&self.name),
            table.qualified_name(kind),
            using,
            cols
        )
    }
}

/// Snapshot taken by a dialect strategy before generic DDL runs.
///
/// `saved_columns`/`saved_indexes` hold the table as declared;
/// `deferred_indexes` are non-canonical indexes on managed spatial
/// columns, re-added after the backend has registered the columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DdlScope {
    pub saved_columns: Vec<Column>,
    pub saved_indexes: Vec<Index>,
    pub deferred_indexes: Vec<Index>,
}

/// Table metadata with the spatial lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    #[serde(skip)]
    pub(crate) ddl_scope: Option<DdlScope>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Table {
            schema: None,
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            ddl_scope: None,
        }
    }

    pub fn with_schema(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Table {
            schema: Some(schema.into()),
            ..Table::new(name)
        }
    }

    /// Attach a column.
    ///
    /// For spatial columns this syncs nullability between the column and
    /// its descriptor and appends the canonical spatial index entry when
    /// one is requested and was not already reflected from the database.
    pub fn add_column(&mut self, mut column: Column) -> &mut Self {
        let column_nullable = column.nullable;
        let mut force_not_null = false;
        if let Some(ty) = column.spatial_type_mut() {
            if !ty.nullable {
                force_not_null = true;
            } else {
                ty.nullable = column_nullable;
            }
        }
        if force_not_null {
            column.nullable = false;
        }
        if let Some(ty) = column.spatial_type() {
            if ty.spatial_index && ty.spatial_index_reflected != Some(true) {
                let mut index = Index::new(
                    spatial_index_name(&self.name, &column.name),
                    vec![column.name.clone()],
                );
                index.using_gist = true;
                index.nd_ops = ty.use_nd_index;
                index.raster_expression = ty.base == SpatialBase::Raster;
                self.indexes.push(index);
            }
        }
        self.columns.push(column);
        self
    }

    pub fn add_index(&mut self, index: Index) -> &mut Self {
        self.indexes.push(index);
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Spatial columns currently attached.
    pub fn spatial_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_spatial())
    }

    /// Schema-qualified, quoted table name.
    pub fn qualified_name(&self, kind: DialectKind) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}.{}",
                kind.quote_ident(schema),
                kind.quote_ident(&self.name)
            ),
            None => kind.quote_ident(&self.name),
        }
    }

    /// Generic CREATE TABLE statement for the current column list.
    pub fn create_sql(&self, kind: DialectKind) -> String {
        let mut defs = Vec::with_capacity(self.columns.len() + 1);
        for col in &self.columns {
            let mut def = match &col.ty {
                ColumnType::Plain(sql_type) => {
                    format!("{} {}", kind.quote_ident(&col.name), sql_type)
                }
                ColumnType::Spatial(ty) => {
                    if kind.is_mysql_family() {
                        // Nullability and SRID ride along with the type.
                        format!("{} {}", kind.quote_ident(&col.name), ty.mysql_col_spec(kind))
                    } else {
                        format!("{} {}", kind.quote_ident(&col.name), ty.col_spec())
                    }
                }
            };
            let nullability_in_type =
                col.is_spatial() && kind.is_mysql_family() && !col.primary_key;
            if !col.nullable && !nullability_in_type && !col.primary_key {
                def.push_str(" NOT NULL");
            }
            defs.push(def);
        }
        let pk_cols = self
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| kind.quote_ident(&c.name))
            .collect::<Vec<_>>();
        if !pk_cols.is_empty() {
            defs.push(format!("PRIMARY KEY ({})", pk_cols.join(", ")));
        }
        format!(
            "CREATE TABLE {} ({})",
            self.qualified_name(kind),
            defs.join(", ")
        )
    }

    /// Generic DROP TABLE statement.
    pub fn drop_sql(&self, kind: DialectKind) -> String {
        format!("DROP TABLE {}", self.qualified_name(kind))
    }

    pub(crate) fn begin_scope(&mut self, scope: DdlScope) {
        self.ddl_scope = Some(scope);
    }

    pub(crate) fn take_scope(&mut self) -> Option<DdlScope> {
        self.ddl_scope.take()
    }

    pub fn has_scope(&self) -> bool {
        self.ddl_scope.is_some()
    }

    /// Put the declared columns and indexes back after a failed
    /// lifecycle step. A no-op when no scope is open.
    pub(crate) fn restore_scope(&mut self) {
        if let Some(scope) = self.ddl_scope.take() {
            self.columns = scope.saved_columns;
            self.indexes = scope.saved_indexes;
        }
    }
}

/// Column description assembled during reflection, before it is turned
/// back into metadata.
#[derive(Debug, Clone)]
pub struct ReflectedColumn {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
    pub spatial: Option<SpatialType>,
}

impl ReflectedColumn {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        ReflectedColumn {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
            spatial: None,
        }
    }
}
