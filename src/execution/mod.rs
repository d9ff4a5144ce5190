pub mod dispatcher;
pub mod result;

pub use dispatcher::{SqlDispatcher, Store};
pub use result::{CellValue, ExecutionResult, Row, RowSet};
