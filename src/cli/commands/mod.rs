pub mod dispatch;
pub mod migrate;
pub mod policy;
pub mod sync;
pub mod worker;
