pub mod db;
pub mod store;

pub use db::{
    create_db, create_memory_db, find_month_plan, insert_month_plan, insert_payment_method,
    insert_tag, insert_transaction, insert_vendor, DbPool, NewTransaction,
};
pub use store::SqliteStore;
