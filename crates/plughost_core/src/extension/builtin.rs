//! Built-in extensions shipped with the host.

use crate::extension::api::{Extension, ExtensionContext, ExtensionResult, Params};
use crate::extension::factory::ExtensionFactories;
use log::debug;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Factory id of [`EchoExtension`].
pub const ECHO_FACTORY_ID: &str = "echo";

pub(crate) fn register_builtins(factories: &mut ExtensionFactories) {
    factories.insert(
        ECHO_FACTORY_ID,
        "Echoes execution parameters back to the caller",
        |context| Ok(Box::new(EchoExtension::new(context))),
    );
}

/// Returns the execution parameters unchanged alongside a call counter.
#[derive(Debug)]
pub struct EchoExtension {
    name: String,
    invocations: AtomicU64,
}

impl EchoExtension {
    pub fn new(context: &ExtensionContext) -> Self {
        Self {
            name: context.name().to_string(),
            invocations: AtomicU64::new(0),
        }
    }
}

impl Extension for EchoExtension {
    fn initialize(&self, context: &ExtensionContext) -> ExtensionResult<()> {
        debug!(
            "event=extension_initialize module=builtin status=ok name={} version={}",
            context.name(),
            context.version()
        );
        Ok(())
    }

    fn execute(&self, params: &Params) -> ExtensionResult<Value> {
        let invocation = self.invocations.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(json!({
            "extension": self.name,
            "invocation": invocation,
            "parameters": params,
        }))
    }
}
