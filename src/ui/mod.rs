// UI module - Front-end orchestration and the worker bridge
//
// This module contains:
// - WorkerBridge: Carries results from tokio workers back to the interactive side
// - AppController: Wires user input to the conversion and self-update services
// - ConsoleUi: Prompt-driven front end on top of AppController

pub mod bridge;
pub mod console;
pub mod controller;

pub use bridge::{WorkerBridge, WorkerEvent};
pub use console::{ConsoleUi, Interrupted};
pub use controller::{AppController, MissingInputs};
