use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use quiesce::runtime::{block_on, Reactor};
use quiesce::time::{delay, yielded};

#[test_log::test]
fn deferred_callbacks_run_in_fifo_order() {
    block_on(async {
        let seen = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let seen = Rc::clone(&seen);
            Reactor::current().defer(move || seen.borrow_mut().push(i));
        }
        yielded().await;
        assert_eq!(*seen.borrow(), [0, 1, 2]);
    });
}

#[test_log::test]
fn timers_fire_in_deadline_order() {
    block_on(async {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let reactor = Reactor::current();
        {
            let seen = Rc::clone(&seen);
            reactor.schedule(Instant::now() + Duration::from_millis(30), move || {
                seen.borrow_mut().push(2)
            });
        }
        {
            let seen = Rc::clone(&seen);
            reactor.schedule(Instant::now() + Duration::from_millis(10), move || {
                seen.borrow_mut().push(1)
            });
        }
        delay(Duration::from_millis(80), None).await.unwrap();
        assert_eq!(*seen.borrow(), [1, 2]);
    });
}

#[test_log::test]
fn a_disposed_timer_never_fires() {
    block_on(async {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let handle = {
            let seen = Rc::clone(&seen);
            Reactor::current().schedule(Instant::now() + Duration::from_millis(10), move || {
                seen.borrow_mut().push("late")
            })
        };
        handle.dispose();
        handle.dispose();
        delay(Duration::from_millis(40), None).await.unwrap();
        assert!(seen.borrow().is_empty());
    });
}

#[test_log::test]
#[should_panic(expected = "inside an existing block_on")]
fn nesting_block_on_panics() {
    block_on(async {
        block_on(async {});
    });
}

#[test_log::test]
#[should_panic(expected = "reactor deadlock")]
fn a_future_with_nothing_to_wait_on_panics() {
    block_on(std::future::pending::<()>());
}

#[test_log::test]
#[should_panic(expected = "within a quiesce runtime")]
fn the_reactor_is_only_available_inside_block_on() {
    let _ = Reactor::current();
}
