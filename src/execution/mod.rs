pub mod cursor;
pub mod filter;
pub mod knn;
pub mod planner;

pub use cursor::{Cursor, CursorState, ResultRow};
pub use filter::FilterCondition;
pub use knn::Interrupt;
pub use planner::{Constraint, QueryPlan, Strategy};
