pub mod artifact_retention;
