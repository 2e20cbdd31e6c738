//! Trellis - Embeddable XML node-table storage
//!
//! Trellis stores a forest of XML documents as a flat table of fixed-width
//! records in document order. Navigation needs no pointers: a node's parent
//! is found through its stored distance and its subtree through its stored
//! size. Subtrees can be inserted and deleted in place while node ids stay
//! stable.
//!
//! # Features
//!
//! - 16 byte records in memory-mapped 4KB blocks
//! - Text and attribute heaps with integer inlining and zstd compression
//! - Namespace scopes aligned to document order
//! - Stable node ids, mapped to positions by a dual red-black tree or a
//!   correction list
//! - Single-writer lock on the database directory
//! - Explicit durability control via flush()
//!
//! # Example
//!
//! ```no_run
//! use trellis_core::{Builder, Data, DataOptions, NodeKind};
//!
//! # fn main() -> anyhow::Result<()> {
//! let options = DataOptions::default();
//!
//! // Build a document into a new database
//! let mut builder = Builder::new(Data::create("library.db", "library", &options)?)?;
//! builder.start_doc("library.xml")?;
//! builder.start_elem("shelf", &[])?;
//! builder.empty_elem("book", &[("id", "1")])?;
//! builder.end_elem()?;
//! builder.end_doc()?;
//! let mut data = builder.finish()?;
//!
//! // Nodes keep their id across edits
//! let book = data.id(2);
//! data.rename(1, NodeKind::Elem, b"case", b"")?;
//! assert_eq!(data.pre(book), Some(2));
//!
//! data.delete(2)?;
//! assert_eq!(data.pre(book), None);
//! data.flush()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Design Philosophy
//!
//! Trellis is the storage layer only. It does not parse or serialize XML,
//! evaluate queries, or implement full-text search. Those concerns are left
//! to the layers above; they drive the [`Builder`] and consume the node
//! accessors of [`Data`].

mod build;
mod data;
mod header;
mod index;
mod lock;
mod meta;
mod names;
mod num;

#[cfg(feature = "internals")]
pub mod idmap;
#[cfg(not(feature = "internals"))]
pub(crate) mod idmap;

#[cfg(feature = "internals")]
pub mod ns;
#[cfg(not(feature = "internals"))]
pub(crate) mod ns;

#[cfg(feature = "internals")]
pub mod table;
#[cfg(not(feature = "internals"))]
pub(crate) mod table;

#[cfg(feature = "internals")]
pub mod text;
#[cfg(not(feature = "internals"))]
pub(crate) mod text;

pub use build::Builder;
pub use data::{Data, DataOptions, TEXT_FILE, VALUE_FILE};
pub use header::{FileKind, HEADER_SIZE, Header, MAGIC, VERSION};
pub use idmap::IdentityMode;
pub use index::{Batch, HashIndex, IndexKind, IndexToken, Indexes, Pending, Updates, ValueIndex};
pub use lock::{DbLock, LOCK_FILE};
pub use meta::{META_FILE, MetaData};
pub use names::Names;
pub use ns::Namespaces;
pub use table::NodeKind;
