mod common;

use common::*;
use conduit_core::{NodeIdentifier, WorkflowError, WorkflowState};
use conduit_network::VirtualTransportProvider;
use conduit_workflow::notification::{NEW_WORKFLOW_TOPIC, WORKFLOW_DISPOSED_TOPIC};
use conduit_workflow::{NotificationService, WorkflowRegistry};
use std::collections::BTreeMap;
use std::sync::Arc;

#[tokio::test]
async fn test_local_registry_tracks_owner_and_disposes_once() {
    let transport = Arc::new(VirtualTransportProvider::new(true));
    let node = TestNode::new("solo", &transport);
    let owner = user("ursula");
    let description = chain("local", &[("source", "solo", quick())]);

    let information = node
        .local
        .create_workflow_instance(&owner, &description, Some("run 1".to_string()), BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(information.name, "run 1");
    assert_eq!(information.user, "ursula");
    assert_eq!(information.component_instances.len(), 1);
    assert_eq!(information.description.owner.as_deref(), Some("ursula"));
    assert!(node.local.is_creator(&information.identifier, &owner).await.unwrap());
    assert!(!node
        .local
        .is_creator(&information.identifier, &user("mallory"))
        .await
        .unwrap());

    let mine = node.local.workflow_informations(&owner).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert!(node
        .local
        .workflow_informations(&user("mallory"))
        .await
        .unwrap()
        .is_empty());

    let err = node
        .local
        .dispose_workflow_instance(&user("mallory"), &information.identifier)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotAuthorized(_)));

    let mut disposed = node
        .notifications
        .subscribe(WORKFLOW_DISPOSED_TOPIC, None)
        .unwrap()
        .receiver;
    node.local
        .dispose_workflow_instance(&owner, &information.identifier)
        .await
        .unwrap();
    node.local
        .dispose_workflow_instance(&owner, &information.identifier)
        .await
        .unwrap();

    assert!(disposed.try_recv().is_ok());
    assert!(disposed.try_recv().is_err());
    assert!(node.local.is_empty());
    assert_eq!(node.host.instance_count(), 0);
    assert!(node
        .local
        .workflow_information(&owner, &information.identifier)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_invalid_description_is_rejected_before_instantiation() {
    let transport = Arc::new(VirtualTransportProvider::new(true));
    let node = TestNode::new("solo", &transport);
    let mut description = chain("broken", &[("source", "solo", quick())]);
    description.nodes.push(description.nodes[0].clone());

    let err = node
        .local
        .create_workflow_instance(&user("ursula"), &description, None, BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidDescription(_)));
    assert!(node.local.is_empty());
}

#[tokio::test]
async fn test_instances_on_two_nodes_are_visible_to_their_owner_only() {
    let (a, b) = two_nodes().await;
    let owner = user("ursula");
    let description = chain("shared", &[("source", "a", quick()), ("sink", "b", quick())]);

    let on_a = a
        .registry
        .create_workflow_instance(&owner, &description, Some("A".into()), BTreeMap::new(), &a.id)
        .await
        .unwrap();
    let on_b = a
        .registry
        .create_workflow_instance(&owner, &description, Some("B".into()), BTreeMap::new(), &b.id)
        .await
        .unwrap();
    assert_eq!(on_a.controller_node, a.id);
    assert_eq!(on_b.controller_node, b.id);
    assert_eq!(
        on_b.involved_nodes().into_iter().collect::<Vec<_>>(),
        vec![a.id.clone(), b.id.clone()]
    );

    let mut names: Vec<String> = a
        .registry
        .workflow_informations(&owner)
        .await
        .into_iter()
        .map(|information| information.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["A".to_string(), "B".to_string()]);
    assert!(a
        .registry
        .workflow_informations(&user("mallory"))
        .await
        .is_empty());

    let found = a
        .registry
        .workflow_information(&owner, &on_b.identifier, &b.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.identifier, on_b.identifier);
}

#[tokio::test]
async fn test_aggregate_is_cached_until_refreshed() {
    let (a, b) = two_nodes().await;
    let owner = user("ursula");
    let description = chain("cached", &[("source", "b", quick())]);

    a.registry
        .create_workflow_instance(&owner, &description, None, BTreeMap::new(), &b.id)
        .await
        .unwrap();
    let first = a.registry.all_workflow_informations(&owner, true).await;
    assert_eq!(first.len(), 1);

    b.local
        .create_workflow_instance(&owner, &description, None, BTreeMap::new())
        .await
        .unwrap();

    let second = a.registry.all_workflow_informations(&owner, false).await;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(
        serde_json::to_vec(&*first).unwrap(),
        serde_json::to_vec(&*second).unwrap()
    );

    let refreshed = a.registry.all_workflow_informations(&owner, true).await;
    assert_eq!(refreshed.len(), 2);
}

#[tokio::test]
async fn test_unreachable_node_is_skipped_in_aggregate() {
    let (a, b) = two_nodes().await;
    let owner = user("ursula");
    a.local
        .create_workflow_instance(&owner, &chain("here", &[("source", "a", quick())]), None, BTreeMap::new())
        .await
        .unwrap();

    // b is known as a workflow host but no longer reachable
    a.connections.close_all_outgoing_connections();
    drop(b);

    let all = a.registry.all_workflow_informations(&owner, true).await;
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_remote_failures_surface_as_domain_errors() {
    let (a, b) = two_nodes().await;
    let owner = user("ursula");

    let mut broken = chain("broken", &[("source", "b", quick())]);
    broken.nodes.push(broken.nodes[0].clone());
    let err = a
        .registry
        .create_workflow_instance(&owner, &broken, None, BTreeMap::new(), &b.id)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidDescription(_)));

    let information = a
        .registry
        .create_workflow_instance(&owner, &chain("ok", &[("source", "b", quick())]), None, BTreeMap::new(), &b.id)
        .await
        .unwrap();
    let err = a
        .registry
        .dispose_workflow_instance(&user("mallory"), &information.identifier, &b.id)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotAuthorized(_)));

    let err = a
        .registry
        .create_workflow_instance(&owner, &chain("nowhere", &[("source", "a", quick())]), None, BTreeMap::new(), &NodeIdentifier::new("nowhere"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Communication(_)));
}

#[tokio::test]
async fn test_instantiation_failure_leaves_no_record() {
    let (a, b) = two_nodes().await;
    let owner = user("ursula");
    let mut description = chain("missing", &[("source", "a", quick()), ("sink", "b", quick())]);
    description.nodes[1].component.component_id = "not-installed".to_string();

    let err = a
        .registry
        .create_workflow_instance(&owner, &description, None, BTreeMap::new(), &a.id)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InstantiationFailed(_)));
    assert!(a.local.is_empty());
    assert_eq!(a.host.instance_count(), 0);
    assert_eq!(b.host.instance_count(), 0);
}

#[tokio::test]
async fn test_distributed_workflow_runs_to_completion() {
    let (a, b) = two_nodes().await;
    let owner = user("ursula");
    let description = chain(
        "distributed",
        &[("source", "a", quick()), ("sink", "b", quick())],
    );

    let information = a
        .registry
        .create_workflow_instance(&owner, &description, None, BTreeMap::new(), &a.id)
        .await
        .unwrap();
    assert_eq!(b.host.instance_count(), 1);

    let mut states = state_subscription(&a, &information);
    let workflow = a.registry.workflow(&information);
    assert_eq!(workflow.start(&owner).await.unwrap(), WorkflowState::Running);
    wait_for_state(&mut states, WorkflowState::Finished).await;

    a.registry
        .dispose_workflow_instance(&owner, &information.identifier, &a.id)
        .await
        .unwrap();
    assert_eq!(b.host.instance_count(), 0);
}

#[tokio::test]
async fn test_remote_instance_is_driven_through_its_proxy() {
    let (a, b) = two_nodes().await;
    let owner = user("ursula");
    let description = chain("remote", &[("source", "b", held())]);

    let information = a
        .registry
        .create_workflow_instance(&owner, &description, None, BTreeMap::new(), &b.id)
        .await
        .unwrap();
    let workflow = a.registry.workflow(&information);
    assert_eq!(workflow.identifier(), information.identifier);

    assert_eq!(workflow.state(&owner).await.unwrap(), WorkflowState::Ready);
    let err = workflow.start(&user("mallory")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotAuthorized(_)));

    assert_eq!(workflow.start(&owner).await.unwrap(), WorkflowState::Running);
    assert_eq!(workflow.pause(&owner).await.unwrap(), WorkflowState::Paused);
    let err = workflow.pause(&owner).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::StateConflict {
            actual: WorkflowState::Paused,
            ..
        }
    ));
    assert_eq!(workflow.resume(&owner).await.unwrap(), WorkflowState::Running);
    assert_eq!(workflow.cancel(&owner).await.unwrap(), WorkflowState::Canceled);
    assert_eq!(workflow.dispose(&owner).await.unwrap(), WorkflowState::Disposed);

    // the registry entry outlives the disposed instance until removed
    a.registry
        .dispose_workflow_instance(&owner, &information.identifier, &b.id)
        .await
        .unwrap();
    assert!(b.local.is_empty());
}

#[tokio::test]
async fn test_concurrent_disposals_are_both_accepted() {
    let transport = Arc::new(VirtualTransportProvider::new(true));
    let node = TestNode::new("solo", &transport);
    let owner = user("ursula");
    let information = node
        .local
        .create_workflow_instance(&owner, &chain("twice", &[("source", "solo", quick())]), None, BTreeMap::new())
        .await
        .unwrap();
    let mut states = state_subscription(&node, &information);
    let workflow = node.registry.workflow(&information);
    workflow.start(&owner).await.unwrap();
    wait_for_state(&mut states, WorkflowState::Finished).await;

    let mut disposed = node
        .notifications
        .subscribe(WORKFLOW_DISPOSED_TOPIC, None)
        .unwrap()
        .receiver;
    let (first, second) = tokio::join!(
        node.local.dispose_workflow_instance(&owner, &information.identifier),
        node.local.dispose_workflow_instance(&owner, &information.identifier),
    );
    assert_eq!(first, Ok(()));
    assert_eq!(second, Ok(()));

    assert!(disposed.try_recv().is_ok());
    assert!(disposed.try_recv().is_err());
    assert!(node.local.is_empty());
    assert_eq!(node.host.instance_count(), 0);
}

#[tokio::test]
async fn test_disposed_instances_leave_no_topics_behind() {
    let transport = Arc::new(VirtualTransportProvider::new(true));
    let node = TestNode::new("solo", &transport);
    let owner = user("ursula");
    let description = chain("topics", &[("source", "solo", quick()), ("sink", "solo", quick())]);

    for _ in 0..3 {
        let information = node
            .local
            .create_workflow_instance(&owner, &description, None, BTreeMap::new())
            .await
            .unwrap();
        let mut states = state_subscription(&node, &information);
        node.registry.workflow(&information).start(&owner).await.unwrap();
        wait_for_state(&mut states, WorkflowState::Finished).await;
        node.local
            .dispose_workflow_instance(&owner, &information.identifier)
            .await
            .unwrap();
    }

    let remaining = node.notifications.subscribe("*", None).unwrap();
    let mut topics: Vec<&str> = remaining
        .last_sequence_numbers
        .keys()
        .map(String::as_str)
        .collect();
    topics.sort();
    assert_eq!(topics, vec![WORKFLOW_DISPOSED_TOPIC, NEW_WORKFLOW_TOPIC]);
}
