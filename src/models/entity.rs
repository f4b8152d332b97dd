//! Entity declarations.
//!
//! An entity describes one table: its name, the bind it lives on and its
//! columns. Declarations are plain data; they take effect when handed to a
//! [`Registry`](crate::db::Registry), usually through `register::<E>()` on a
//! database instance.

use crate::db::statement::{Delete, Insert, Select, Update};
use crate::error::Result;
use crate::models::value::{Row, Value};
use serde::{Deserialize, Serialize};

/// Identifies one physical database target.
///
/// Serialized as the bind name, `null` for the default bind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum BindKey {
    /// The unnamed bind configured through `url`.
    #[default]
    Default,
    /// A bind configured through `binds`.
    Named(String),
}

impl BindKey {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }

    /// The bind name, `None` for the default bind.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Default => None,
            Self::Named(name) => Some(name),
        }
    }
}

impl std::fmt::Display for BindKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "[default]"),
            Self::Named(name) => write!(f, "{}", name),
        }
    }
}

impl From<&str> for BindKey {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for BindKey {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<Option<&str>> for BindKey {
    fn from(name: Option<&str>) -> Self {
        name.map(Self::from).unwrap_or_default()
    }
}

impl From<Option<String>> for BindKey {
    fn from(name: Option<String>) -> Self {
        name.map(Self::Named).unwrap_or_default()
    }
}

impl From<BindKey> for Option<String> {
    fn from(key: BindKey) -> Self {
        match key {
            BindKey::Default => None,
            BindKey::Named(name) => Some(name),
        }
    }
}

impl From<&BindKey> for BindKey {
    fn from(key: &BindKey) -> Self {
        key.clone()
    }
}

/// Logical column types, rendered per dialect by `db::schema`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    BigInteger,
    Float,
    Boolean,
    /// VARCHAR with an optional length
    String(Option<u32>),
    Text,
    Bytes,
    Json,
}

impl ColumnType {
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Integer | Self::BigInteger)
    }
}

/// Target of a foreign key column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub index: bool,
    #[serde(default)]
    pub foreign_key: Option<ForeignKey>,
    /// Raw SQL default expression
    #[serde(default)]
    pub default: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            nullable: true,
            unique: false,
            index: false,
            foreign_key: None,
            default: None,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn big_integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::BigInteger)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Boolean)
    }

    pub fn string(name: impl Into<String>, length: u32) -> Self {
        Self::new(name, ColumnType::String(Some(length)))
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn bytes(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Bytes)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Json)
    }

    /// Primary key columns are implicitly NOT NULL.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
        });
        self
    }

    pub fn default_sql(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }
}

/// Table-level CHECK constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConstraint {
    pub name: Option<String>,
    pub expression: String,
}

/// Declaration of one entity, consumed by the registry.
///
/// Declarations can also be loaded from JSON:
///
/// ```json
/// {"name": "User", "bind": "users", "columns": [
///     {"name": "id", "type": "Integer", "primary_key": true},
///     {"name": "name", "type": {"String": 128}}
/// ]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    #[serde(rename = "name")]
    pub type_name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub bind: BindKey,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub checks: Vec<CheckConstraint>,
}

impl EntityDef {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            table: None,
            bind: BindKey::Default,
            columns: Vec::new(),
            checks: Vec::new(),
        }
    }

    /// Start a declaration identified by a Rust type's full path.
    ///
    /// Types sharing a name in different modules stay distinct; the derived
    /// table name only uses the last path segment.
    pub fn of<T: ?Sized>() -> Self {
        Self::new(std::any::type_name::<T>())
    }

    /// Set an explicit table name instead of deriving one.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = Some(name.into());
        self
    }

    pub fn bind(mut self, key: impl Into<BindKey>) -> Self {
        self.bind = key.into();
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn check(mut self, name: Option<&str>, expression: impl Into<String>) -> Self {
        self.checks.push(CheckConstraint {
            name: name.map(String::from),
            expression: expression.into(),
        });
        self
    }

    /// Explicit table name, or the one derived from the type name.
    pub fn table_name(&self) -> String {
        match &self.table {
            Some(name) => name.clone(),
            None => derive_table_name(short_type_name(&self.type_name)),
        }
    }
}

/// Derive a snake_case table name from a CamelCase type name.
///
/// An underscore goes before every uppercase letter that follows a lowercase
/// letter or digit, and before an uppercase letter followed by a lowercase
/// one unless it starts the name. `HTTPResponse` becomes `http_response`.
pub fn derive_table_name(type_name: &str) -> String {
    let chars: Vec<char> = type_name.chars().collect();
    let mut out = String::with_capacity(type_name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let after_lower = i > 0 && {
                let prev = chars[i - 1];
                prev.is_ascii_lowercase() || prev.is_ascii_digit()
            };
            let before_lower = i > 0 && chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            if after_lower || before_lower {
                out.push('_');
            }
        }
        out.push(c.to_ascii_lowercase());
    }

    out.trim_start_matches('_').to_string()
}

fn short_type_name(full: &str) -> &str {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}

/// A type that declares a table.
///
/// ```ignore
/// struct User;
///
/// impl Entity for User {
///     fn definition() -> EntityDef {
///         EntityDef::of::<User>()
///             .bind("users")
///             .column(Column::integer("id").primary_key())
///             .column(Column::string("name", 128))
///     }
/// }
/// ```
pub trait Entity: 'static {
    fn definition() -> EntityDef;

    fn table_name() -> String {
        Self::definition().table_name()
    }

    /// `SELECT * FROM <table>`
    fn select() -> Select {
        Select::from(Self::table_name())
    }

    fn insert() -> Insert {
        Insert::into(Self::table_name())
    }

    fn update() -> Update {
        Update::table(Self::table_name())
    }

    fn delete() -> Delete {
        Delete::from(Self::table_name())
    }
}

/// An entity whose instances map to rows.
pub trait Model: Entity + Sized {
    /// Column values to insert. Omit auto-increment keys that are unset.
    fn to_values(&self) -> Vec<(String, Value)>;

    fn from_row(row: &Row) -> Result<Self>;
}
