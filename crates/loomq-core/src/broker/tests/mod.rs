use super::*;
use crate::error::StorageError;
use crate::message::{MessageState, PendingAssignment};
use crate::storage::{RocksDbStorage, WriteBatchOp};

mod common;
use common::*;
