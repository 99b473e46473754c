/*!
# Progress

Turns a workout program kept in a Google spreadsheet into a structured
exercise list.

## Overview

The user signs in with Google, picks a spreadsheet (or names one by id), and
every visible worksheet of that spreadsheet becomes one exercise. Each data
row of a worksheet is one movement: name, sets, reps, load, rest and
progression rate. Worksheets whose title starts with `_` are notes and are
never read.

## Architecture

### Pipeline
- **Auth** - Session restore, sign-in handshake, sign-out
- **Pick** - Choose one spreadsheet from the user's Drive
- **Fetch** - Batched read of every visible sheet's `A1:Z100` window
- **Extract** - Pure mapping from raw grids to the workout model

The steps run strictly in that order and at most one run is live. Starting
a new run or signing out supersedes the run in flight, which then produces
no outcome.

### Front ends
- **CLI** (`progress`) - `login`, `logout`, `status`, `run`
- **HTTP** (`website`, feature `web`) - the legacy JSON backend with
  cookie sessions kept in the router state

## Modules

- **model**: Session token, document, sheet and workout types
- **error**: `PipelineError` and its closed `ErrorKind` tag
- **config**: Per-environment defaults with a JSON overlay
- **store**: Durable session token storage
- **identity**: Google OAuth 2.0 client
- **auth**: Session state machine
- **gate**: Run epochs used to cancel superseded work
- **picker**: Drive-backed spreadsheet selection
- **sheets**: Sheets v4 metadata and batched range reads
- **extract**: Grid to exercise extraction and cell coercion
- **pipeline**: The controller tying the steps together
- **server**: axum routes for the legacy backend (feature `web`)
*/

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod gate;
pub mod identity;
pub mod model;
pub mod picker;
pub mod pipeline;
#[cfg(feature = "web")]
pub mod server;
pub mod sheets;
pub mod store;

pub use auth::{AuthSessionManager, AuthStatus, RestorePolicy};
pub use config::{Config, Environment};
pub use error::{ErrorKind, PipelineError, Result};
pub use extract::{CoercionPolicy, ExerciseExtractor};
pub use model::*;
pub use pipeline::{Command, Outcome, PipelineController};
