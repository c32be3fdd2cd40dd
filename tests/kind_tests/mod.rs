//! Integration tests against a real cluster
//!
//! # Test Organization
//!
//! - `xfn_labelizer`: a claim rendered through a composition function that
//!   labels every composed resource; the engine follows claim, composite and
//!   managed resources and waits for each label
//! - `registry_certificate`: the TLS setup step writes its secret and config
//!   map, and both can be read back
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind xfn_labelizer -- --ignored --nocapture
//! ```

mod registry_certificate;
mod xfn_labelizer;

use converge::config::Settings;
use converge::env::Environment;
use converge::telemetry::init_tracing;

/// Connect using `CONVERGE_*` settings
pub async fn live_environment() -> Environment {
    init_tracing();
    let settings = Settings::from_env().expect("valid CONVERGE_* settings");
    Environment::from_settings(&settings)
        .await
        .expect("cluster reachable")
}
