pub mod catalog;
pub mod resolver;
pub mod sync;

pub use catalog::{Catalog, CatalogMod, CatalogVariant};
pub use resolver::{ModRef, ModSet, ServerVariant, VariantResolver, parse_mod_list};
pub use sync::{SyncOptions, sync_vanilla};
