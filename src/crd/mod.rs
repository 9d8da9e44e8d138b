//! Custom Resource Definitions for the SVM operator
//!
//! - StorageVirtualMachine: desired state of one SVM and its protocol features

pub mod storage_virtual_machine;

pub use storage_virtual_machine::*;
