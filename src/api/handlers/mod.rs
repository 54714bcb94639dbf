pub mod finetune;
pub mod health;
pub mod job_script;
pub mod model_request;
