pub mod create;
pub mod init;
pub mod ledger;
pub mod next_id;
pub mod validate;
