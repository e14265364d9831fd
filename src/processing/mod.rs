pub mod debouncer;
pub mod pulse_processor;
pub mod rate;
pub mod sample_source;
