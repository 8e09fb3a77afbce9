//! Repository layer over the connection pool.

pub mod column;
pub mod public;
pub mod row;
pub mod table;

pub use column::{ColumnRepository, ColumnRepositoryError, MoveDirection};
pub use public::{
    ColumnValues, PublicRepository, PublicRepositoryError, PublicTableSummary, RecordPage,
    TableRecord, TableRecordPage,
};
pub use row::{RowRepository, RowRepositoryError};
pub use table::{MassAction, TableRepository, TableRepositoryError};
