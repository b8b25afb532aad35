use std::cell::RefCell;
use std::rc::Rc;

use quiesce::disposable::{combine, Disposable};
use quiesce::event::{EventChannel, Subscription};
use quiesce::runtime::block_on;
use quiesce::time::yielded;

#[test_log::test]
fn delivers_in_subscription_order() {
    let channel = EventChannel::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    for tag in ["a", "b", "c"] {
        let seen = Rc::clone(&seen);
        channel.subscribe(move |n: u32| seen.borrow_mut().push(format!("{tag}{n}")));
    }
    channel.raise(1);
    channel.raise(2);
    assert_eq!(*seen.borrow(), ["a1", "b1", "c1", "a2", "b2", "c2"]);
}

#[test_log::test]
fn listener_disposed_mid_dispatch_is_skipped() {
    let channel = EventChannel::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let second: Rc<RefCell<Option<Subscription<()>>>> = Rc::new(RefCell::new(None));
    {
        let seen = Rc::clone(&seen);
        let second = Rc::clone(&second);
        channel.subscribe(move |()| {
            seen.borrow_mut().push("first");
            if let Some(subscription) = second.borrow_mut().take() {
                subscription.dispose();
            }
        });
    }
    {
        let seen = Rc::clone(&seen);
        *second.borrow_mut() =
            Some(channel.subscribe(move |()| seen.borrow_mut().push("second")));
    }
    {
        let seen = Rc::clone(&seen);
        channel.subscribe(move |()| seen.borrow_mut().push("third"));
    }
    channel.raise(());
    assert_eq!(*seen.borrow(), ["first", "third"]);
}

#[test_log::test]
fn self_disposal_does_not_disturb_the_rest_of_the_pass() {
    let channel = EventChannel::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let own: Rc<RefCell<Option<Subscription<()>>>> = Rc::new(RefCell::new(None));
    let subscription = {
        let seen = Rc::clone(&seen);
        let own = Rc::clone(&own);
        channel.subscribe(move |()| {
            seen.borrow_mut().push("once");
            if let Some(own) = own.borrow_mut().take() {
                own.dispose();
            }
        })
    };
    *own.borrow_mut() = Some(subscription);
    {
        let seen = Rc::clone(&seen);
        channel.subscribe(move |()| seen.borrow_mut().push("steady"));
    }
    channel.raise(());
    channel.raise(());
    assert_eq!(*seen.borrow(), ["once", "steady", "steady"]);
}

#[test_log::test]
fn listeners_added_during_dispatch_wait_for_the_next_raise() {
    let channel: EventChannel<()> = EventChannel::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let channel = channel.clone();
        let seen = Rc::clone(&seen);
        channel.clone().subscribe(move |()| {
            seen.borrow_mut().push("outer");
            let seen = Rc::clone(&seen);
            channel.subscribe(move |()| seen.borrow_mut().push("inner"));
        });
    }
    channel.raise(());
    assert_eq!(*seen.borrow(), ["outer"]);
    channel.raise(());
    assert_eq!(*seen.borrow(), ["outer", "outer", "inner"]);
}

#[test_log::test]
fn clear_detaches_without_invoking() {
    let channel = EventChannel::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let seen = Rc::clone(&seen);
        channel.subscribe(move |n: u32| seen.borrow_mut().push(n));
    }
    channel.clear();
    assert!(channel.is_empty());
    channel.raise(9);
    assert!(seen.borrow().is_empty());
}

#[test_log::test]
fn dispose_is_idempotent() {
    let channel = EventChannel::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let subscription = {
        let seen = Rc::clone(&seen);
        channel.subscribe(move |n: u32| seen.borrow_mut().push(("gone", n)))
    };
    {
        let seen = Rc::clone(&seen);
        channel.subscribe(move |n: u32| seen.borrow_mut().push(("kept", n)));
    }
    subscription.dispose();
    subscription.dispose();
    channel.raise(3);
    assert_eq!(*seen.borrow(), [("kept", 3)]);
}

#[test_log::test]
fn combined_handles_release_every_subscription() {
    let channel = EventChannel::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut handles: Vec<Box<dyn Disposable>> = Vec::new();
    for tag in ["a", "b"] {
        let seen = Rc::clone(&seen);
        handles.push(Box::new(
            channel.subscribe(move |n: u32| seen.borrow_mut().push((tag, n))),
        ));
    }
    {
        let seen = Rc::clone(&seen);
        channel.subscribe(move |n: u32| seen.borrow_mut().push(("kept", n)));
    }
    let combined = combine(handles);
    combined.dispose();
    combined.dispose();
    channel.raise(4);
    assert_eq!(*seen.borrow(), [("kept", 4)]);
}

#[test_log::test]
fn deferred_listeners_run_on_the_next_queue_turn() {
    block_on(async {
        let channel = EventChannel::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            channel.subscribe_deferred(move |n: u32| seen.borrow_mut().push(("deferred", n)));
        }
        {
            let seen = Rc::clone(&seen);
            channel.subscribe(move |n: u32| seen.borrow_mut().push(("inline", n)));
        }
        channel.raise(7);
        assert_eq!(*seen.borrow(), [("inline", 7)]);
        yielded().await;
        assert_eq!(*seen.borrow(), [("inline", 7), ("deferred", 7)]);
    });
}
