pub mod angle_sequence;
pub mod capture_session;
pub mod enrollment_config;
pub mod enrollment_error;
pub mod frame_producer;
pub mod profile_assembler;
pub mod session_logger;
pub mod session_state;
