//! Course data: records, the shared store, the week counter and texts.

pub mod course;
pub mod render;
pub mod store;
pub mod week;

pub use course::CourseRecord;
pub use store::CourseStore;
pub use week::WeekCounter;
