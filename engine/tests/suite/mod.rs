mod chat_run;
mod memory;
mod workflow;
