use std::sync::Arc;

use letterbox::mail::{Deliveries, Message, Observer, Settings, TestDelivery};
use letterbox::MailerClass;

const ROUNDS: usize = 64;

fn observer() -> Arc<dyn Observer> {
    Arc::new(|_: &Message| {})
}

fn names_with_prefix(class: &MailerClass, prefix: &str) -> Vec<String> {
    class
        .delivery_methods()
        .names()
        .into_iter()
        .filter(|name| name.starts_with(prefix))
        .map(String::from)
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parent_and_child_registries_under_concurrent_writes() {
    let parent = MailerClass::new("ApplicationMailer");
    let child = MailerClass::inherit("UserMailer", &parent);
    let deliveries = Deliveries::new();

    let parent_observers: Vec<_> = (0..ROUNDS).map(|_| observer()).collect();
    let child_observers: Vec<_> = (0..ROUNDS).map(|_| observer()).collect();

    let mut tasks = Vec::new();

    let (class, hooks, store) = (parent.clone(), parent_observers.clone(), deliveries.clone());
    tasks.push(tokio::spawn(async move {
        for (i, hook) in hooks.into_iter().enumerate() {
            class.register_delivery_method(
                format!("parent_{i}"),
                TestDelivery::constructor(store.clone()),
                Settings::new(),
            );
            class.register_observer(hook);
            tokio::task::yield_now().await;
        }
    }));

    let (class, hooks, store) = (child.clone(), child_observers.clone(), deliveries.clone());
    tasks.push(tokio::spawn(async move {
        for (i, hook) in hooks.into_iter().enumerate() {
            class.register_delivery_method(
                format!("child_{i}"),
                TestDelivery::constructor(store.clone()),
                Settings::new(),
            );
            class.register_observer(hook.clone());
            if i % 2 == 1 {
                assert!(class.unregister_delivery_method(&format!("child_{i}")));
                assert!(class.unregister_observer(&hook));
            }
            tokio::task::yield_now().await;
        }
    }));

    for class in [parent.clone(), child.clone()] {
        tasks.push(tokio::spawn(async move {
            for _ in 0..ROUNDS * 4 {
                let methods = class.delivery_methods();
                assert!(methods.get("test").is_some());
                assert!(methods.get("smtp").is_some());
                let _ = class.observers().len();
                tokio::task::yield_now().await;
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(names_with_prefix(&parent, "parent_").len(), ROUNDS);
    assert!(names_with_prefix(&parent, "child_").is_empty());

    let mut kept = names_with_prefix(&child, "child_");
    kept.sort();
    let mut expected: Vec<String> = (0..ROUNDS)
        .filter(|i| i % 2 == 0)
        .map(|i| format!("child_{i}"))
        .collect();
    expected.sort();
    assert_eq!(kept, expected);

    let parent_hooks = parent.observers();
    assert_eq!(parent_hooks.len(), ROUNDS);
    assert!(parent_observers.iter().all(|hook| parent_hooks.contains(hook)));
    assert!(child_observers.iter().all(|hook| !parent_hooks.contains(hook)));

    let child_hooks = child.observers();
    for (i, hook) in child_observers.iter().enumerate() {
        assert_eq!(child_hooks.contains(hook), i % 2 == 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_composition_resolves_the_class_method() {
    let parent = MailerClass::new("ApplicationMailer");
    parent.set_delivery_method("test");
    parent.default("from", "app@example.com");
    let child = MailerClass::inherit("UserMailer", &parent);
    child.action("ping", |m, _| {
        m.mail(letterbox::MailOptions::new().to("ada@example.com").body("ping"))?;
        Ok(())
    });

    let mut tasks = Vec::new();
    for i in 0..8 {
        let (parent, child) = (parent.clone(), child.clone());
        tasks.push(tokio::spawn(async move {
            parent.register_observer(observer());
            let mut delivery = child.deliver("ping", vec![]).unwrap();
            let message = delivery.message().unwrap();
            assert_eq!(message.delivery_method_name(), Some("test"));
            child.set_delivery_settings(format!("test_{i}"), Settings::new());
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(parent.observers().len(), 8);
}
