pub mod face_landmarks;
pub mod landmark_extractor;
