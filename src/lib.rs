//! edgewise - event-driven triangular and basis arbitrage engine.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── domain/       # Venue-agnostic types: fixed point, books, orders, signals
//! ├── bus/          # Typed in-process pub/sub with bounded subscriber buffers
//! ├── marketdata/   # Book state, trade history, funding series, freshness
//! ├── exchange/     # VenueGateway trait + token-bucket rate limiting
//! ├── adapter/      # kcex / nobitex adapters and the dry-run simulator
//! ├── costmodel/    # Fee, slippage, and funding estimation
//! ├── strategy/     # Tri-arb and basis-arb detection modules
//! ├── risk/         # Synchronous risk gate, PnL tracking, kill switch
//! ├── order/        # Order lifecycle and idempotent submission
//! ├── execution/    # Leg sequencing, retries, abort-unwind, reports
//! ├── portfolio/    # Balances, positions, venue reconciliation
//! ├── persistence/  # Async write sink: sqlite checkpoints + JSONL analytics
//! ├── monitor/      # Metrics, alerts, ops endpoints
//! └── app/          # Config and orchestration
//! ```
//!
//! Data flows gateway → market data → bus → strategies → signals → execution
//! → risk gate → order manager → gateway, with acknowledgements and fills
//! feeding back through the bus into portfolio and risk state.

pub mod adapter;
pub mod app;
pub mod bus;
pub mod costmodel;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod marketdata;
pub mod monitor;
pub mod order;
pub mod persistence;
pub mod portfolio;
pub mod risk;
pub mod strategy;
