pub mod history;
pub mod rest;
pub mod ws;
