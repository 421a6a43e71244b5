//! 工具：表格存储网关、工单台账

pub mod table_store;
pub mod ticket_logger;

pub use table_store::{CsvTableStore, MemoryTableStore, Record, TableStore};
pub use ticket_logger::{Ticket, TicketLedger, TicketPayload};
