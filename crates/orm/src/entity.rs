//! Entity declaration: a record type whose fields carry `orm` tags.
//!
//! Entities are declared with the [`entity!`](crate::entity) macro, which
//! generates the struct itself plus an [`Entity`] implementation exposing the
//! field list, tag sets and by-name accessors that the migrator, query
//! builder and row mapper work from.
//!
//! ```
//! use kiln_orm::{entity, Entity, FieldKind, Timestamp};
//!
//! entity! {
//!     #[derive(Debug, Clone, Default, PartialEq)]
//!     pub struct User {
//!         #[orm("pk;autoinc")]
//!         pub id: i64,
//!         #[orm("unique;size:50")]
//!         pub email: String,
//!         #[orm("default:false")]
//!         pub is_admin: bool,
//!         #[orm("now")]
//!         pub created_at: Timestamp,
//!         pub nickname: Option<String>,
//!     }
//! }
//!
//! assert_eq!(User::table_name(), "users");
//! let fields = User::fields();
//! assert_eq!(fields[0].column, "id");
//! assert!(fields[0].tags.autoinc);
//! assert_eq!(fields[3].kind, FieldKind::Timestamp);
//! assert!(fields[4].nullable);
//! ```

use crate::case::snake_case;
use crate::error::Result;
use crate::mapper::{FieldKind, FieldType};
use crate::tags::Tags;
use crate::value::Value;

/// One declared field of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Rust field name.
    pub name: &'static str,
    /// Column name (snake_case of the field name).
    pub column: String,
    pub kind: FieldKind,
    /// `Option<_>` fields map to nullable columns.
    pub nullable: bool,
    /// Integer width in bytes; zero for other families.
    pub bytes: u8,
    pub tags: Tags,
}

impl Field {
    pub fn of<T: FieldType>(name: &'static str, tags: &str) -> Self {
        Self {
            name,
            column: snake_case(name.trim_start_matches("r#")),
            kind: T::KIND,
            nullable: T::NULLABLE,
            bytes: T::BYTES,
            tags: Tags::parse(tags),
        }
    }
}

/// A record type that can be migrated, inserted and read back.
///
/// Implemented by the [`entity!`](crate::entity) macro; hand-written
/// implementations must keep `fields()`, `values()` and `assign()` in the
/// same field order.
pub trait Entity: Default + Clone + Send + Sync + 'static {
    /// Declared fields, in declaration order.
    fn fields() -> &'static [Field];

    /// Current field values, keyed by Rust field name, in declaration order.
    fn values(&self) -> Vec<(&'static str, Value)>;

    /// Whether the named field holds its type's zero value.
    fn is_zero(&self, field: &str) -> bool;

    /// Coerce `value` into the named field.
    ///
    /// Returns `Ok(false)` when the entity has no such field.
    fn assign(&mut self, field: &str, value: Value) -> Result<bool>;

    /// Default table name: snake_case of the type name plus `s`.
    fn table_name() -> String {
        let full = std::any::type_name::<Self>();
        let short = full.split('<').next().unwrap_or(full).rsplit("::").next().unwrap_or(full);
        format!("{}s", snake_case(short))
    }

    /// Primary key column, if one is declared.
    fn primary_key() -> Option<&'static Field> {
        Self::fields().iter().find(|f| f.tags.is_primary())
    }
}

/// Declare an entity struct and implement [`Entity`] for it.
///
/// Each field may carry one `#[orm("...")]` attribute holding the
/// semicolon-separated tag grammar (`pk`, `autoinc`, `unique`, `iunique`,
/// `notnull`, `size:<n>`, `default:<expr>`, `check:<expr>`, `now`, `text`,
/// `fk:<table>.<column>[:<on-delete>][:<on-update>]`). The struct must
/// derive (or implement) `Default` and `Clone`.
#[macro_export]
macro_rules! entity {
    (@tags $tags:literal) => { $tags };
    (@tags) => { "" };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[orm($tags:literal)])?
                $fvis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $fvis $field: $ty, )*
        }

        impl $crate::Entity for $name {
            fn fields() -> &'static [$crate::Field] {
                static FIELDS: ::std::sync::OnceLock<::std::vec::Vec<$crate::Field>> = ::std::sync::OnceLock::new();
                FIELDS.get_or_init(|| {
                    ::std::vec![
                        $( $crate::Field::of::<$ty>(::std::stringify!($field), $crate::entity!(@tags $($tags)?)), )*
                    ]
                })
            }

            fn values(&self) -> ::std::vec::Vec<(&'static str, $crate::Value)> {
                ::std::vec![
                    $( (::std::stringify!($field), $crate::FieldType::to_value(&self.$field)), )*
                ]
            }

            fn is_zero(&self, field: &str) -> bool {
                match field {
                    $( ::std::stringify!($field) => $crate::FieldType::is_zero(&self.$field), )*
                    _ => true,
                }
            }

            fn assign(&mut self, field: &str, value: $crate::Value) -> $crate::error::Result<bool> {
                match field {
                    $(
                        ::std::stringify!($field) => {
                            self.$field = <$ty as $crate::FieldType>::from_value(value)?;
                            Ok(true)
                        },
                    )*
                    _ => Ok(false),
                }
            }
        }
    };
}
