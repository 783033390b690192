//! Fixtures shared by the unit tests.

use crate::basetypes::SerializationMode;
use crate::factory::{FactorySettings, TaurusFactory};
use crate::logging::DeprecationPolicy;
use crate::schemes::sim::{SimBackend, SIM_SCHEME};
use crate::threadpool::JobDispatcher;
use std::sync::Arc;

/// Serial factory over the demo simulation back-end.
pub(crate) fn sim_factory() -> (Arc<TaurusFactory>, Arc<SimBackend>) {
    let sim = Arc::new(SimBackend::demo(Some("//localhost:10000".into()), false));
    let mut settings = FactorySettings::new(SIM_SCHEME);
    settings.serialization_mode = SerializationMode::Serial;
    let factory = TaurusFactory::new(
        settings,
        sim.clone(),
        Arc::new(JobDispatcher::serial()),
        Arc::new(DeprecationPolicy::default()),
    )
    .expect("sim factory");
    (factory, sim)
}
