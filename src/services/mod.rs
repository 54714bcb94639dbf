pub mod cleanup;
pub mod job_script;
pub mod manifest;
pub mod notification;
pub mod pipeline;
pub mod port_allocator;
pub mod staging;
pub mod transfer;
pub mod worker;
