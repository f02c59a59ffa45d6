pub mod json_profile_store;
