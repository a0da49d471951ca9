//! Workflow instance lifecycle.
//!
//! Each [`WorkflowInstance`] owns one command queue served by a dedicated
//! task, so the lifecycle transitions of an instance run strictly one after
//! another while different instances proceed in parallel. Every state change
//! is published on the instance's state topic.

use crate::component::{
    ComponentController, ComponentInstantiation, DistributedComponentRegistry, OutputBinding,
};
use crate::model::{ComponentInstanceDescriptor, WorkflowDescription, WorkflowInformation};
use crate::notification::{
    component_failed_topic, component_finished_topic, workflow_state_topic, Notification,
    NotificationService, SubscriptionId, NEW_WORKFLOW_TOPIC, WORKFLOW_DISPOSED_TOPIC,
};
use crate::remote::into_workflow_error;
use async_trait::async_trait;
use conduit_core::{
    ComponentInstanceId, ComponentState, NodeIdentifier, User, WorkflowError, WorkflowInstanceId,
    WorkflowState,
};
use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Lifecycle operations available on a workflow instance, wherever it runs.
#[async_trait]
pub trait WorkflowControl: Send + Sync {
    fn identifier(&self) -> WorkflowInstanceId;

    async fn start(&self, user: &User) -> Result<WorkflowState, WorkflowError>;

    async fn pause(&self, user: &User) -> Result<WorkflowState, WorkflowError>;

    async fn resume(&self, user: &User) -> Result<WorkflowState, WorkflowError>;

    async fn cancel(&self, user: &User) -> Result<WorkflowState, WorkflowError>;

    /// Complete a running instance once its components are done.
    async fn finished(&self, user: &User) -> Result<WorkflowState, WorkflowError>;

    async fn dispose(&self, user: &User) -> Result<WorkflowState, WorkflowError>;

    async fn state(&self, user: &User) -> Result<WorkflowState, WorkflowError>;
}

/// Rejects invalid credentials and anyone but the owner.
pub fn authorize(owner: &User, user: &User) -> Result<(), WorkflowError> {
    if !user.is_valid() {
        return Err(WorkflowError::InvalidUser(user.id.clone()));
    }
    if !user.same(owner) {
        return Err(WorkflowError::NotAuthorized(user.id.clone()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Initialize,
    Start,
    Pause,
    Resume,
    Cancel,
    Finished,
    Dispose,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Prepare,
    Start,
    Pause,
    Resume,
    Cancel,
    Finished,
    Dispose,
}

type Reply = oneshot::Sender<Result<WorkflowState, WorkflowError>>;

struct Command {
    operation: Operation,
    user: User,
    reason: Option<String>,
    reply: Option<Reply>,
}

type ControllerEntry = (ComponentInstanceDescriptor, Arc<dyn ComponentController>);

/// Handle to one workflow instance. Clones share the same instance.
#[derive(Clone)]
pub struct WorkflowInstance {
    id: WorkflowInstanceId,
    owner: User,
    state: Arc<RwLock<WorkflowState>>,
    information: Arc<RwLock<WorkflowInformation>>,
    controllers: Arc<RwLock<Vec<ControllerEntry>>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl WorkflowInstance {
    /// Create the instance in state `INIT` and start its command queue.
    ///
    /// The queue runs until the last handle is dropped.
    pub fn spawn(
        information: WorkflowInformation,
        owner: User,
        components: Arc<DistributedComponentRegistry>,
        notifications: Arc<dyn NotificationService>,
    ) -> Self {
        let (commands, mut queue) = mpsc::unbounded_channel::<Command>();
        let instance = Self {
            id: information.identifier,
            owner: owner.clone(),
            state: Arc::new(RwLock::new(WorkflowState::Init)),
            information: Arc::new(RwLock::new(information.clone())),
            controllers: Arc::new(RwLock::new(Vec::new())),
            commands,
        };

        let mut orchestrator = Orchestrator {
            id: instance.id,
            owner,
            description: information.description,
            controller_node: information.controller_node,
            state: instance.state.clone(),
            information: instance.information.clone(),
            controllers: instance.controllers.clone(),
            components,
            notifications,
            queue: instance.commands.downgrade(),
            subscriptions: Vec::new(),
            finish_on_resume: false,
        };
        tokio::spawn(async move {
            while let Some(command) = queue.recv().await {
                orchestrator.execute(command).await;
            }
            orchestrator.release_subscriptions();
            debug!("Command queue of workflow {} closed", orchestrator.id);
        });

        instance
    }

    pub fn id(&self) -> WorkflowInstanceId {
        self.id
    }

    pub fn owner(&self) -> &User {
        &self.owner
    }

    pub fn information(&self) -> WorkflowInformation {
        self.information.read().clone()
    }

    /// State without an ownership check, for the hosting node's own use.
    pub fn current_state(&self) -> WorkflowState {
        *self.state.read()
    }

    /// Instantiate all components and move to `READY`.
    pub async fn initialize(&self, user: &User) -> Result<WorkflowState, WorkflowError> {
        self.submit(Operation::Initialize, user).await
    }

    pub fn component_instance_descriptors(
        &self,
        user: &User,
    ) -> Result<Vec<ComponentInstanceDescriptor>, WorkflowError> {
        authorize(&self.owner, user)?;
        Ok(self.information.read().component_instances.clone())
    }

    pub async fn state_of_component(
        &self,
        user: &User,
        component: &ComponentInstanceId,
    ) -> Result<ComponentState, WorkflowError> {
        authorize(&self.owner, user)?;
        let controller = self
            .controllers
            .read()
            .iter()
            .find(|(descriptor, _)| &descriptor.identifier == component)
            .map(|(_, controller)| controller.clone())
            .ok_or(WorkflowError::ComponentNotFound(*component))?;
        controller.state().await.map_err(into_workflow_error)
    }

    async fn submit(&self, operation: Operation, user: &User) -> Result<WorkflowState, WorkflowError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command {
                operation,
                user: user.clone(),
                reason: None,
                reply: Some(reply),
            })
            .map_err(|_| WorkflowError::QueueClosed(self.id))?;
        response
            .await
            .map_err(|_| WorkflowError::QueueClosed(self.id))?
    }
}

#[async_trait]
impl WorkflowControl for WorkflowInstance {
    fn identifier(&self) -> WorkflowInstanceId {
        self.id
    }

    async fn start(&self, user: &User) -> Result<WorkflowState, WorkflowError> {
        self.submit(Operation::Start, user).await
    }

    async fn pause(&self, user: &User) -> Result<WorkflowState, WorkflowError> {
        self.submit(Operation::Pause, user).await
    }

    async fn resume(&self, user: &User) -> Result<WorkflowState, WorkflowError> {
        self.submit(Operation::Resume, user).await
    }

    async fn cancel(&self, user: &User) -> Result<WorkflowState, WorkflowError> {
        self.submit(Operation::Cancel, user).await
    }

    async fn finished(&self, user: &User) -> Result<WorkflowState, WorkflowError> {
        self.submit(Operation::Finished, user).await
    }

    async fn dispose(&self, user: &User) -> Result<WorkflowState, WorkflowError> {
        self.submit(Operation::Dispose, user).await
    }

    async fn state(&self, user: &User) -> Result<WorkflowState, WorkflowError> {
        authorize(&self.owner, user)?;
        Ok(self.current_state())
    }
}

/// Executes commands from the queue; only ever touched by the queue task.
struct Orchestrator {
    id: WorkflowInstanceId,
    owner: User,
    description: WorkflowDescription,
    controller_node: NodeIdentifier,
    state: Arc<RwLock<WorkflowState>>,
    information: Arc<RwLock<WorkflowInformation>>,
    controllers: Arc<RwLock<Vec<ControllerEntry>>>,
    components: Arc<DistributedComponentRegistry>,
    notifications: Arc<dyn NotificationService>,
    queue: mpsc::WeakUnboundedSender<Command>,
    subscriptions: Vec<SubscriptionId>,
    /// All components reported completion while the instance was paused.
    finish_on_resume: bool,
}

impl Orchestrator {
    async fn execute(&mut self, command: Command) {
        let user = &command.user;
        let result = match command.operation {
            Operation::Initialize => self.initialize(user).await,
            Operation::Start => self.start(user).await,
            Operation::Pause => self.pause(user).await,
            Operation::Resume => self.resume(user).await,
            Operation::Cancel => self.cancel(user).await,
            Operation::Finished
                if command.reply.is_none() && self.current_state() == WorkflowState::Paused =>
            {
                info!(
                    "Components of workflow {} completed while paused, finishing on resume",
                    self.id
                );
                self.finish_on_resume = true;
                Ok(())
            }
            Operation::Finished => self.finished(user).await,
            Operation::Dispose => self.dispose(user).await,
            Operation::Fail => {
                let reason = command.reason.as_deref().unwrap_or("component failure");
                self.fail_on_report(reason).await
            }
        };

        if let Err(e) = &result {
            // Watcher commands have nobody to report to.
            if command.reply.is_none() {
                warn!(
                    "{:?} on workflow {} was dropped: {}",
                    command.operation, self.id, e
                );
            } else {
                debug!(
                    "{:?} on workflow {} did not complete: {}",
                    command.operation, self.id, e
                );
            }
        }
        if let Some(reply) = command.reply {
            let _ = reply.send(result.map(|()| self.current_state()));
        }
    }

    fn current_state(&self) -> WorkflowState {
        *self.state.read()
    }

    fn controllers(&self) -> Vec<ControllerEntry> {
        self.controllers.read().clone()
    }

    fn require_state(
        &self,
        operation: &str,
        allowed: &[WorkflowState],
    ) -> Result<(), WorkflowError> {
        let actual = self.current_state();
        if allowed.contains(&actual) {
            return Ok(());
        }
        Err(WorkflowError::StateConflict {
            operation: operation.to_string(),
            required: allowed
                .iter()
                .map(WorkflowState::name)
                .collect::<Vec<_>>()
                .join(" or "),
            actual,
        })
    }

    /// Once `FAILED`, only the disposal states may replace it.
    fn set_state(&self, new_state: WorkflowState) {
        {
            let mut state = self.state.write();
            if *state == WorkflowState::Failed
                && !matches!(new_state, WorkflowState::Disposing | WorkflowState::Disposed)
            {
                debug!(
                    "Workflow {} is FAILED, not changing state to {}",
                    self.id, new_state
                );
                return;
            }
            *state = new_state;
        }

        debug!("Workflow {} is now {}", self.id, new_state);
        self.notifications.send(
            &workflow_state_topic(&self.id),
            Value::String(new_state.name().to_string()),
        );
        if new_state == WorkflowState::Disposed {
            self.notifications
                .send(WORKFLOW_DISPOSED_TOPIC, Value::String(self.id.to_string()));
        }
    }

    async fn initialize(&mut self, user: &User) -> Result<(), WorkflowError> {
        self.require_state("initialize", &[WorkflowState::Init])?;
        authorize(&self.owner, user)?;

        if let Err(e) = self.instantiate_components(user).await {
            self.fail(&e.to_string()).await;
            for (descriptor, _) in self.controllers() {
                if let Err(e) = self
                    .components
                    .dispose_component_instance(user, &descriptor)
                    .await
                {
                    warn!(
                        "Failed to dispose component {} after failed instantiation: {}",
                        descriptor.name, e
                    );
                }
            }
            return Err(e);
        }

        self.set_state(WorkflowState::Ready);
        self.notifications
            .send(NEW_WORKFLOW_TOPIC, Value::String(self.id.to_string()));
        self.watch_component_reports();
        Ok(())
    }

    async fn instantiate_components(&mut self, user: &User) -> Result<(), WorkflowError> {
        for node in &self.description.nodes {
            let instantiation = ComponentInstantiation {
                workflow_instance: self.id,
                workflow_node: node.identifier.clone(),
                name: node.name.clone(),
                component: node.component.clone(),
                input_connected: self.description.has_incoming(&node.identifier),
                controller_node: self.controller_node.clone(),
            };
            let descriptor = self
                .components
                .create_component_instance(user, instantiation, &node.component.node)
                .await
                .map_err(|e| {
                    WorkflowError::InstantiationFailed(format!("component {}: {}", node.name, e))
                })?;
            let controller = self.components.controller(&descriptor)?;
            self.controllers.write().push((descriptor, controller));
        }

        let descriptors = self
            .controllers()
            .into_iter()
            .map(|(descriptor, _)| descriptor)
            .collect();
        self.information.write().component_instances = descriptors;
        Ok(())
    }

    async fn start(&mut self, user: &User) -> Result<(), WorkflowError> {
        self.require_state("start", &[WorkflowState::Ready])?;
        authorize(&self.owner, user)?;

        self.set_state(WorkflowState::Preparing);
        if let Err(e) = self.run_phase(user, Phase::Prepare).await {
            self.fail(&e.to_string()).await;
            return Err(e);
        }
        self.set_state(WorkflowState::Running);
        if let Err(e) = self.call_all(user, Phase::Start).await {
            self.fail(&e.to_string()).await;
            return Err(e);
        }
        info!("Started workflow {}", self.id);
        Ok(())
    }

    async fn pause(&mut self, user: &User) -> Result<(), WorkflowError> {
        self.require_state("pause", &[WorkflowState::Running])?;
        authorize(&self.owner, user)?;
        self.transition(
            user,
            WorkflowState::Pausing,
            Phase::Pause,
            WorkflowState::Paused,
        )
        .await
    }

    async fn resume(&mut self, user: &User) -> Result<(), WorkflowError> {
        self.require_state("resume", &[WorkflowState::Paused])?;
        authorize(&self.owner, user)?;
        self.transition(
            user,
            WorkflowState::Resuming,
            Phase::Resume,
            WorkflowState::Running,
        )
        .await?;
        if std::mem::take(&mut self.finish_on_resume) {
            enqueue(
                &self.queue,
                Command {
                    operation: Operation::Finished,
                    user: self.owner.clone(),
                    reason: None,
                    reply: None,
                },
            );
        }
        Ok(())
    }

    async fn cancel(&mut self, user: &User) -> Result<(), WorkflowError> {
        self.require_state(
            "cancel",
            &[
                WorkflowState::Ready,
                WorkflowState::Preparing,
                WorkflowState::Running,
                WorkflowState::Pausing,
                WorkflowState::Paused,
                WorkflowState::Resuming,
                WorkflowState::Failed,
            ],
        )?;
        authorize(&self.owner, user)?;
        self.transition(
            user,
            WorkflowState::Canceling,
            Phase::Cancel,
            WorkflowState::Canceled,
        )
        .await
    }

    async fn finished(&mut self, user: &User) -> Result<(), WorkflowError> {
        self.require_state("finish", &[WorkflowState::Running])?;
        authorize(&self.owner, user)?;
        if let Err(e) = self.call_all(user, Phase::Finished).await {
            self.fail(&e.to_string()).await;
            return Err(e);
        }
        self.set_state(WorkflowState::Finished);
        info!("Workflow {} finished", self.id);
        Ok(())
    }

    async fn dispose(&mut self, user: &User) -> Result<(), WorkflowError> {
        self.require_state(
            "dispose",
            &[
                WorkflowState::Finished,
                WorkflowState::Canceled,
                WorkflowState::Failed,
            ],
        )?;
        authorize(&self.owner, user)?;

        self.set_state(WorkflowState::Disposing);
        if let Err(e) = self.run_phase(user, Phase::Dispose).await {
            warn!(
                "Disposing components of workflow {} failed, releasing it anyway: {}",
                self.id, e
            );
        }
        for (descriptor, _) in self.controllers() {
            if let Err(e) = self
                .components
                .dispose_component_instance(user, &descriptor)
                .await
            {
                warn!(
                    "Failed to dispose component instance {}: {}",
                    descriptor.identifier, e
                );
            }
        }
        self.release_subscriptions();
        self.notifications
            .remove_publisher(&component_finished_topic(&self.id));
        self.notifications
            .remove_publisher(&component_failed_topic(&self.id));
        self.set_state(WorkflowState::Disposed);
        self.notifications
            .remove_publisher(&workflow_state_topic(&self.id));
        Ok(())
    }

    /// `intermediate`, then the phase on every controller, then `target`.
    async fn transition(
        &mut self,
        user: &User,
        intermediate: WorkflowState,
        phase: Phase,
        target: WorkflowState,
    ) -> Result<(), WorkflowError> {
        self.set_state(intermediate);
        if let Err(e) = self.run_phase(user, phase).await {
            self.fail(&e.to_string()).await;
            return Err(e);
        }
        self.set_state(target);
        Ok(())
    }

    async fn fail_on_report(&mut self, reason: &str) -> Result<(), WorkflowError> {
        let active = [
            WorkflowState::Ready,
            WorkflowState::Preparing,
            WorkflowState::Running,
            WorkflowState::Pausing,
            WorkflowState::Paused,
            WorkflowState::Resuming,
        ];
        if active.contains(&self.current_state()) {
            self.fail(reason).await;
        } else {
            debug!(
                "Ignoring failure report for workflow {} in state {}: {}",
                self.id,
                self.current_state(),
                reason
            );
        }
        Ok(())
    }

    /// Cancel everything and mark the instance `FAILED`. Errors on the way
    /// are only logged.
    async fn fail(&mut self, reason: &str) {
        error!("Workflow {} failed: {}", self.id, reason);
        let owner = self.owner.clone();
        if let Err(e) = self.call_all(&owner, Phase::Cancel).await {
            warn!(
                "Canceling components of failed workflow {} failed: {}",
                self.id, e
            );
        }
        if let Err(e) = self.wait_for_components().await {
            warn!(
                "Components of failed workflow {} did not settle: {}",
                self.id, e
            );
        }
        self.set_state(WorkflowState::Failed);
    }

    async fn run_phase(&self, user: &User, phase: Phase) -> Result<(), WorkflowError> {
        self.call_all(user, phase).await?;
        self.wait_for_components().await
    }

    async fn call_all(&self, user: &User, phase: Phase) -> Result<(), WorkflowError> {
        let controllers = self.controllers();
        let calls = controllers.iter().map(|(descriptor, controller)| {
            let outputs = match phase {
                Phase::Prepare => self.output_bindings(descriptor, &controllers),
                _ => Vec::new(),
            };
            async move {
                let result = match phase {
                    Phase::Prepare => controller.prepare(user, outputs).await,
                    Phase::Start => controller.start(user).await,
                    Phase::Pause => controller.pause(user).await,
                    Phase::Resume => controller.resume(user).await,
                    Phase::Cancel => controller.cancel(user).await,
                    Phase::Finished => controller.finished(user).await,
                    Phase::Dispose => controller.dispose(user).await,
                };
                result.map_err(|e| format!("{}: {}", descriptor.name, e))
            }
        });
        collect_failures(join_all(calls).await)
    }

    /// Waits for every controller, even after one has failed.
    async fn wait_for_components(&self) -> Result<(), WorkflowError> {
        let controllers = self.controllers();
        let waits = controllers.iter().map(|(descriptor, controller)| async move {
            controller
                .wait_for_lifecycle_phase_finished()
                .await
                .map_err(|e| format!("{}: {}", descriptor.name, e))
        });
        collect_failures(join_all(waits).await)
    }

    fn output_bindings(
        &self,
        source: &ComponentInstanceDescriptor,
        controllers: &[ControllerEntry],
    ) -> Vec<OutputBinding> {
        self.description
            .connections_from(&source.workflow_node)
            .filter_map(|connection| {
                controllers
                    .iter()
                    .find(|(target, _)| target.workflow_node == connection.target)
                    .map(|(target, _)| OutputBinding {
                        output: connection.output.clone(),
                        target: target.clone(),
                        input: connection.input.clone(),
                    })
            })
            .collect()
    }

    /// Subscribe to completion and failure reports of this instance's components.
    fn watch_component_reports(&mut self) {
        let pending: HashSet<ComponentInstanceId> = self
            .controllers()
            .iter()
            .map(|(descriptor, _)| descriptor.identifier)
            .collect();

        match self
            .notifications
            .subscribe(&component_finished_topic(&self.id), None)
        {
            Ok(subscription) => {
                self.subscriptions.push(subscription.id);
                tokio::spawn(watch_finished(
                    subscription.receiver,
                    pending,
                    self.queue.clone(),
                    self.owner.clone(),
                ));
            }
            Err(e) => warn!(
                "Cannot observe component completion of workflow {}: {}",
                self.id, e
            ),
        }

        match self
            .notifications
            .subscribe(&component_failed_topic(&self.id), None)
        {
            Ok(subscription) => {
                self.subscriptions.push(subscription.id);
                tokio::spawn(watch_failed(
                    subscription.receiver,
                    self.queue.clone(),
                    self.owner.clone(),
                ));
            }
            Err(e) => warn!(
                "Cannot observe component failures of workflow {}: {}",
                self.id, e
            ),
        }
    }

    fn release_subscriptions(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            self.notifications.unsubscribe(&subscription);
        }
    }
}

fn collect_failures(results: Vec<Result<(), String>>) -> Result<(), WorkflowError> {
    let failures: Vec<String> = results.into_iter().filter_map(Result::err).collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::ComponentFailed(failures.join("; ")))
    }
}

fn enqueue(queue: &mpsc::WeakUnboundedSender<Command>, command: Command) {
    if let Some(queue) = queue.upgrade() {
        let _ = queue.send(command);
    }
}

/// Enqueues `finished` once every component has reported completion.
async fn watch_finished(
    mut receiver: mpsc::UnboundedReceiver<Notification>,
    mut pending: HashSet<ComponentInstanceId>,
    queue: mpsc::WeakUnboundedSender<Command>,
    owner: User,
) {
    if pending.is_empty() {
        return;
    }
    while let Some(notification) = receiver.recv().await {
        if let Some(component) = notification
            .body
            .as_str()
            .and_then(|id| id.parse::<ComponentInstanceId>().ok())
        {
            pending.remove(&component);
        }
        if pending.is_empty() {
            enqueue(
                &queue,
                Command {
                    operation: Operation::Finished,
                    user: owner,
                    reason: None,
                    reply: None,
                },
            );
            return;
        }
    }
}

/// Enqueues the failure path on the first failure report.
async fn watch_failed(
    mut receiver: mpsc::UnboundedReceiver<Notification>,
    queue: mpsc::WeakUnboundedSender<Command>,
    owner: User,
) {
    if let Some(notification) = receiver.recv().await {
        let reason = match notification.body {
            Value::String(reason) => reason,
            other => other.to_string(),
        };
        enqueue(
            &queue,
            Command {
                operation: Operation::Fail,
                user: owner,
                reason: Some(format!("component reported failure: {}", reason)),
                reply: None,
            },
        );
    }
}
