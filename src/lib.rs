pub mod chart;
pub mod config;
pub mod document;
pub mod error;
pub mod font;
pub mod geometry;
pub mod layout;
pub mod payload;
pub mod report;
pub mod report_layout;
pub mod routes;
pub mod template;
