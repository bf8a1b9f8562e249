//! Query building: the expression visitor, the fluent query state, join
//! composition, and the untyped façade.

mod any;
mod join;
mod query;
mod visit;

pub use any::AnyQuery;
pub use join::{JoinFormat, JoinType, TableOptions};
pub use query::{Query, QueryType};
pub use visit::Visitor;
