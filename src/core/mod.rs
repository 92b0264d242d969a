pub mod credential;
pub mod git;
