//! Dispatch Service - field work orders, completions and inventory custody.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod inventory;
pub mod middleware;
pub mod models;
pub mod orders;
pub mod policy;
pub mod services;
pub mod startup;
