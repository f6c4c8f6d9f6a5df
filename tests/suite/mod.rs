mod cli;
mod probe;
mod teardown;
