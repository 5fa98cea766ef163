mod config;
mod persistence;
