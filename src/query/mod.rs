pub mod request;
pub mod result;

pub use request::{Filter, FilterOp, Order, PageSpec, QueryRequest, SortSpec};
pub use result::{PageInfo, QueryResult};
