//! Change types every domain gets for free.

mod delete;
mod set_order;

pub use delete::DeleteChange;
pub use set_order::SetOrderChange;
