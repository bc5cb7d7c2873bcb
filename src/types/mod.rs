pub mod plan;
pub mod report;
