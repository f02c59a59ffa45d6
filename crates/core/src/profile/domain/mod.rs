pub mod biometric_profile;
pub mod profile_store;
