//! Spreadsheet import service
//!
//! Turns an uploaded workbook into structured regional metrics:
//! - `workbook`   - decode xlsx/xlsm/xlsb/xls/ods/csv into header-keyed rows
//! - `regions`    - region code vocabulary and resolution
//! - `extraction` - build the model prompt and request a completion
//! - `repair`     - validate and coerce the model's response
//! - `commit`     - persist metrics and data points
//! - `status`     - file record status transitions
//! - `pipeline`   - one import run, end to end
//! - `http`       - the HTTP trigger

pub mod commit;
pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod http;
pub mod llm;
pub mod pipeline;
pub mod regions;
pub mod repair;
pub mod status;
pub mod storage;
pub mod workbook;

#[cfg(test)]
mod testing;
