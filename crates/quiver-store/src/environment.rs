// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The environment: one store, one publish queue, one network handle.
//!
//! Environments are instance-scoped — there is no process-wide
//! singleton, and multiple environments may coexist. The environment
//! wires the pieces together: network responses are normalized into
//! fresh sources and staged on the queue; queue runs publish into the
//! store; store notifies subscribers. Missing-field handlers registered
//! here are consulted by [`Environment::check`].

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use crate::ast::{OperationDescriptor, Selector, Variables};
use crate::checker::{Availability, MissingFieldHandler};
use crate::error::{MutationError, NetworkError, PayloadError, PublishError};
use crate::handles::Handler;
use crate::normalizer::normalize_response;
use crate::observable::{Observable, Observer};
use crate::proxy::{RecordSourceProxy, SelectorRecordSourceProxy};
use crate::publish_queue::{OptimisticUpdate, PublishQueue, ResponsePayload, UpdateToken};
use crate::reader::Snapshot;
use crate::record::JsonValue;
use crate::source::InMemoryRecordSource;
use crate::store::{RetainToken, Store, StoreConfig, SubscriptionToken};

/// One network emission: a response tree plus any server-side errors.
#[derive(Debug, Clone)]
pub struct GraphResponse {
    /// The response data tree.
    pub data: JsonValue,
    /// Field-level errors reported alongside the data.
    pub errors: Vec<PayloadError>,
}

/// The transport seam.
///
/// Implementations return a lazy observable; no request work may start
/// before the environment subscribes. Transports deliver events on the
/// caller's context (single-threaded cooperative scheduling).
pub trait Network {
    /// Executes `operation` with `variables`.
    fn execute(
        &self,
        operation: &Arc<OperationDescriptor>,
        variables: &Variables,
    ) -> Observable<GraphResponse, NetworkError>;
}

/// Fallback transport for store-only environments: every request errors.
struct NoNetwork;

impl Network for NoNetwork {
    fn execute(
        &self,
        _operation: &Arc<OperationDescriptor>,
        _variables: &Variables,
    ) -> Observable<GraphResponse, NetworkError> {
        Observable::throw(NetworkError {
            message: "no network configured for this environment".to_owned(),
        })
    }
}

/// Configuration of one mutation execution.
pub struct MutationConfig {
    /// The mutation operation.
    pub operation: Arc<OperationDescriptor>,
    /// Variables the operation is issued with.
    pub variables: Variables,
    /// Optimistic response applied before the request starts and
    /// reverted on completion or error.
    pub optimistic_response: Option<JsonValue>,
    /// Optimistic selector-bound updater, applied (and re-applied on
    /// overlay rebuilds) alongside the optimistic response.
    pub optimistic_updater: Option<Box<dyn FnMut(&mut SelectorRecordSourceProxy<'_, '_>)>>,
    /// Committed updater run once after the server payloads are staged.
    pub updater: Option<Box<dyn FnOnce(&mut RecordSourceProxy<'_>)>>,
}

impl MutationConfig {
    /// Creates a config with no optimistic behavior and no updater.
    pub fn new(operation: Arc<OperationDescriptor>, variables: Variables) -> Self {
        Self {
            operation,
            variables,
            optimistic_response: None,
            optimistic_updater: None,
            updater: None,
        }
    }
}

impl std::fmt::Debug for MutationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationConfig")
            .field("operation", &self.operation.name)
            .field("optimistic_response", &self.optimistic_response.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Environment`].
pub struct EnvironmentBuilder {
    network: Option<Box<dyn Network>>,
    store_config: StoreConfig,
    handlers: Vec<(String, Box<dyn Handler>)>,
    missing_field_handlers: Vec<MissingFieldHandler>,
}

impl EnvironmentBuilder {
    /// Installs the network transport.
    #[must_use]
    pub fn network(mut self, network: Box<dyn Network>) -> Self {
        self.network = Some(network);
        self
    }

    /// Overrides the store configuration.
    #[must_use]
    pub fn store_config(mut self, config: StoreConfig) -> Self {
        self.store_config = config;
        self
    }

    /// Registers a handle-field handler.
    #[must_use]
    pub fn handler(mut self, name: impl Into<String>, handler: Box<dyn Handler>) -> Self {
        self.handlers.push((name.into(), handler));
        self
    }

    /// Registers a missing-field handler consulted by
    /// [`Environment::check`].
    #[must_use]
    pub fn missing_field_handler(mut self, handler: MissingFieldHandler) -> Self {
        self.missing_field_handlers.push(handler);
        self
    }

    /// Builds the environment.
    #[must_use]
    pub fn build(self) -> Environment {
        let mut queue = PublishQueue::new();
        for (name, handler) in self.handlers {
            queue.register_handler(name, handler);
        }
        Environment {
            store: Store::with_config(self.store_config),
            queue,
            network: self.network.unwrap_or_else(|| Box::new(NoNetwork)),
            missing_field_handlers: self.missing_field_handlers,
        }
    }
}

/// Owns exactly one [`Store`], one [`PublishQueue`], and one network
/// handle.
pub struct Environment {
    store: Store,
    queue: PublishQueue,
    network: Box<dyn Network>,
    missing_field_handlers: Vec<MissingFieldHandler>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("store", &self.store)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Starts building an environment.
    #[must_use]
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder {
            network: None,
            store_config: StoreConfig::default(),
            handlers: Vec::new(),
            missing_field_handlers: Vec::new(),
        }
    }

    /// The owned store, for reads.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The owned store, for direct mutation by hosts that bypass the
    /// queue (tests, tooling).
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Reads `selector` through the store's current view.
    #[must_use]
    pub fn lookup(&self, selector: &Selector) -> Snapshot {
        self.store.lookup(selector)
    }

    /// Checks `selector` for completeness, consulting this environment's
    /// missing-field handlers.
    pub fn check(&mut self, selector: &Selector) -> Availability {
        self.store
            .check_with_handlers(selector, &self.missing_field_handlers)
    }

    /// Subscribes to changes of `snapshot`'s selector.
    pub fn subscribe(
        &mut self,
        snapshot: Snapshot,
        callback: impl FnMut(&Snapshot) + 'static,
    ) -> SubscriptionToken {
        self.store.subscribe(snapshot, callback)
    }

    /// Removes a subscription. Idempotent.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) {
        self.store.unsubscribe(token);
    }

    /// Pins `selector` against garbage collection.
    pub fn retain(&mut self, selector: Selector) -> RetainToken {
        self.store.retain(selector)
    }

    /// Releases a retain. Idempotent.
    pub fn release(&mut self, token: RetainToken) {
        self.store.release(token);
    }

    /// Normalizes `data` as a response to `operation` and publishes it.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::Shape`] when the response does not match
    /// the operation's selections (nothing is published), or
    /// [`MutationError::Publish`] when the publish cycle fails.
    pub fn commit_payload(
        &mut self,
        operation: &Arc<OperationDescriptor>,
        variables: Variables,
        data: &JsonValue,
    ) -> Result<(), MutationError> {
        let selector = Selector::operation_root(operation, variables);
        let mut source = InMemoryRecordSource::new();
        let field_payloads = normalize_response(&mut source, &selector, data)?;
        self.queue.commit_payload(ResponsePayload {
            source,
            field_payloads,
            errors: Vec::new(),
        });
        self.run_and_notify()?;
        Ok(())
    }

    /// Stages and immediately publishes a non-revertible updater.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when the publish cycle fails.
    pub fn commit_update(
        &mut self,
        updater: impl FnOnce(&mut RecordSourceProxy<'_>) + 'static,
    ) -> Result<(), PublishError> {
        self.queue.commit_updater(updater);
        self.run_and_notify()
    }

    /// Applies an optimistic update and dispatches notifications.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when the overlay rebuild fails.
    pub fn apply_update(&mut self, update: OptimisticUpdate) -> Result<UpdateToken, PublishError> {
        let token = self.queue.apply_update(update);
        self.run_and_notify()?;
        Ok(token)
    }

    /// Reverts an optimistic update and dispatches notifications.
    /// Idempotent per token.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when the overlay rebuild fails.
    pub fn revert_update(&mut self, token: UpdateToken) -> Result<(), PublishError> {
        self.queue.revert_update(token);
        self.run_and_notify()
    }

    /// Executes a mutation: applies the optimistic update, issues the
    /// request, commits every emitted payload in order, reverts the
    /// optimistic update, and notifies subscribers.
    ///
    /// # Errors
    ///
    /// [`MutationError::Network`] on transport failure,
    /// [`MutationError::Payload`] when the server reports errors,
    /// [`MutationError::Shape`]/[`MutationError::Publish`] when the
    /// response cannot be committed. On every error path the optimistic
    /// update has been reverted before this returns.
    pub fn execute_mutation(&mut self, config: MutationConfig) -> Result<(), MutationError> {
        let MutationConfig {
            operation,
            variables,
            optimistic_response,
            optimistic_updater,
            updater,
        } = config;

        let optimistic_token =
            if optimistic_response.is_some() || optimistic_updater.is_some() {
                let token = self.queue.apply_update(OptimisticUpdate::SelectorUpdater {
                    operation: Arc::clone(&operation),
                    variables: variables.clone(),
                    response: optimistic_response,
                    updater: optimistic_updater,
                });
                self.run_and_notify()
                    .map_err(MutationError::Publish)?;
                Some(token)
            } else {
                None
            };

        debug!(operation = %operation.name, "execute mutation");
        let responses: Rc<RefCell<Vec<GraphResponse>>> = Rc::new(RefCell::new(Vec::new()));
        let failure: Rc<RefCell<Option<NetworkError>>> = Rc::new(RefCell::new(None));
        let observable = self.network.execute(&operation, &variables);
        let next_sink = Rc::clone(&responses);
        let error_sink = Rc::clone(&failure);
        let mut subscription = observable.subscribe(
            Observer::new()
                .on_next(move |response| next_sink.borrow_mut().push(response))
                .on_error(move |err| *error_sink.borrow_mut() = Some(err)),
        );

        let staged = self.stage_mutation_responses(&operation, &variables, &responses, &failure);
        if let Ok(()) = &staged {
            if let Some(updater) = updater {
                self.queue.commit_updater(updater);
            }
        }
        subscription.unsubscribe();
        // The optimistic update is disposed on completion and on error
        // alike; the same run that publishes the real payloads drops the
        // overlay.
        if let Some(token) = optimistic_token {
            self.queue.revert_update(token);
        }
        self.run_and_notify().map_err(MutationError::Publish)?;
        staged
    }

    fn stage_mutation_responses(
        &mut self,
        operation: &Arc<OperationDescriptor>,
        variables: &Variables,
        responses: &Rc<RefCell<Vec<GraphResponse>>>,
        failure: &Rc<RefCell<Option<NetworkError>>>,
    ) -> Result<(), MutationError> {
        if let Some(err) = failure.borrow_mut().take() {
            return Err(MutationError::Network(err));
        }
        let responses = std::mem::take(&mut *responses.borrow_mut());
        let mut staged = Vec::with_capacity(responses.len());
        for response in responses {
            if !response.errors.is_empty() {
                return Err(MutationError::Payload(response.errors));
            }
            let selector = Selector::operation_root(operation, variables.clone());
            let mut source = InMemoryRecordSource::new();
            let field_payloads = normalize_response(&mut source, &selector, &response.data)?;
            staged.push(ResponsePayload {
                source,
                field_payloads,
                errors: response.errors,
            });
        }
        for payload in staged {
            self.queue.commit_payload(payload);
        }
        Ok(())
    }

    /// Runs the publish queue into the store, then notifies subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when the cycle fails; the base source is
    /// unchanged in that case.
    pub fn run_and_notify(&mut self) -> Result<(), PublishError> {
        self.queue.run(&mut self.store)?;
        self.store.notify();
        Ok(())
    }
}
