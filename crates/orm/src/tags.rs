//! The `orm` tag grammar attached to entity fields.
//!
//! Tags are separated by semicolons: `pk;autoinc`, `unique;size:50`,
//! `fk:users.id:cascade:noaction`. Unrecognised tags are ignored and logged
//! at `warn`.

use derive_more::Display;

/// Referential action for `ON DELETE` / `ON UPDATE`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum FkAction {
    #[display("CASCADE")]
    Cascade,
    #[display("NO ACTION")]
    NoAction,
    #[display("SET NULL")]
    SetNull,
    #[display("SET DEFAULT")]
    SetDefault,
}

impl FkAction {
    fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "cascade" => Some(Self::Cascade),
            "noaction" => Some(Self::NoAction),
            "setnull" => Some(Self::SetNull),
            "setdefault" => Some(Self::SetDefault),
            _ => None,
        }
    }
}

/// `fk:<table>.<column>[:<on-delete>][:<on-update>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub on_delete: Option<FkAction>,
    pub on_update: Option<FkAction>,
}

/// Parsed tag set for one entity field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    pub pk: bool,
    pub autoinc: bool,
    pub unique: bool,
    /// Case-insensitive uniqueness.
    pub iunique: bool,
    pub notnull: bool,
    pub size: Option<u32>,
    pub default: Option<String>,
    pub check: Option<String>,
    pub now: bool,
    pub text: bool,
    pub fk: Option<ForeignKey>,
}

impl Tags {
    pub fn parse(input: &str) -> Self {
        let mut tags = Self::default();
        for raw in input.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            let (name, arg) = match raw.split_once(':') {
                Some((name, arg)) => (name.trim(), Some(arg)),
                None => (raw, None),
            };
            match (name.to_ascii_lowercase().as_str(), arg) {
                ("pk", None) => tags.pk = true,
                ("autoinc", None) => tags.autoinc = true,
                ("unique", None) => tags.unique = true,
                ("iunique", None) => tags.iunique = true,
                ("notnull", None) => tags.notnull = true,
                ("now", None) => tags.now = true,
                ("text", None) => tags.text = true,
                ("size", Some(n)) => match n.trim().parse() {
                    Ok(n) => tags.size = Some(n),
                    Err(_) => tracing::warn!(tag = raw, "Ignoring size tag with a non-numeric length"),
                },
                ("default", Some(expr)) => tags.default = Some(expr.to_string()),
                ("check", Some(expr)) => tags.check = Some(expr.to_string()),
                ("fk", Some(spec)) => match parse_fk(spec) {
                    Some(fk) => tags.fk = Some(fk),
                    None => tracing::warn!(tag = raw, "Ignoring malformed foreign key tag"),
                },
                _ => tracing::warn!(tag = raw, "Ignoring unrecognised orm tag"),
            }
        }
        tags
    }

    /// `pk` or `autoinc`.
    pub fn is_primary(&self) -> bool {
        self.pk || self.autoinc
    }
}

fn parse_fk(spec: &str) -> Option<ForeignKey> {
    let mut parts = spec.split(':');
    let (table, column) = parts.next()?.split_once('.')?;
    if table.trim().is_empty() || column.trim().is_empty() {
        return None;
    }
    let on_delete = parts.next().and_then(FkAction::parse);
    let on_update = parts.next().and_then(FkAction::parse);
    Some(ForeignKey {
        table: table.trim().to_string(),
        column: column.trim().to_string(),
        on_delete,
        on_update,
    })
}
