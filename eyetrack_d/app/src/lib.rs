pub mod backend;
pub mod channels;
pub mod control;
pub mod osc;
pub mod scheduler;
pub mod worker;
