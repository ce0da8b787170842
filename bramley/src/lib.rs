#![warn(missing_docs)]
//! Bramley B-Tree
//!
//! # Why is this called Bramley?
//!
//! Bramley is a variety of apple tree. This crate grows B-Trees.
//!
//! # Implementation Details
//!
//! Provides an in-memory B-Tree with a user specified order (branching factor) which can be
//! written to, and read back from, a pair of files.
//!
//! (If you aren't sure what that means, you can read more about B-Trees here: <https://en.wikipedia.org/wiki/B-tree>.)
//!
//! Every node holds between `min` and `max` entries (the root may hold fewer) and all leaves
//! sit at the same depth. Entries are opaque to the tree: ordering comes from [`Ord`] and the
//! on-disk form comes from the [`record::Record`] trait.
//!
//! The whole tree is resident in memory. When written out, the tree is split across two files:
//!  - Structure file, contains the shape of the tree and the serialized key of each entry
//!  - Data file, contains the serialized payload of each entry
//!
//! Each key in the structure file records the offset and length of its payload in the data
//! file.
//!
//! Note: Most of these details (nodes, file layout, serialization format) are tucked away inside
//! the implementation. The user experience should be similar to working with a BTreeSet.
//!

pub mod btree;
mod io;
pub mod record;

use bincode::config::AllowTrailing;
use bincode::config::FixintEncoding;
use bincode::config::NativeEndian;
use bincode::config::WithOtherEndian;
use bincode::config::WithOtherIntEncoding;
use bincode::config::WithOtherTrailing;
use bincode::{DefaultOptions, Options};
use std::sync::LazyLock;

static BINCODER: LazyLock<
    WithOtherEndian<
        WithOtherIntEncoding<WithOtherTrailing<DefaultOptions, AllowTrailing>, FixintEncoding>,
        NativeEndian,
    >,
> = LazyLock::new(|| {
    bincode::DefaultOptions::new()
        .allow_trailing_bytes()
        .with_fixint_encoding()
        .with_native_endian()
});
