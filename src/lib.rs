//! httpload: a virtual-user HTTP load generator.
//!
//! Virtual users run a script in a loop against a target HTTP service. Every
//! request yields a [`loadtest::client::RequestRecord`], named checks are
//! evaluated per response, and the number of live users follows a constant
//! or staged [`loadtest::profile::LoadProfile`].

pub mod loadtest;
