pub mod client;

pub use client::{CommentFeed, HttpClient, SubmitApi};
