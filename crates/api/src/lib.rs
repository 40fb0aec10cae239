//! HTTP API: one route group per shop station, plus a refresh stream.

pub mod app;
