pub mod loadtest;
