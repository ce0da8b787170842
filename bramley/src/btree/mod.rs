//! B-Tree implementation
//!

// Re-export
pub use self::bramley::Bramley;
pub use self::bramley::BramleyError;
pub use self::bramley::Direction;
pub use self::iter::Iter;

pub mod bramley;
mod iter;
pub(crate) mod node;
