use crate::channel::Unichannel;
use crate::exec::{InlineExecutor, ManualExecutor};
use crate::task::{Cancelled, TaskHandle, spawn_detached};
use anyhow::{Result, ensure};
use static_assertions::assert_not_impl_any;
use std::cell::Cell;
use std::rc::Rc;

assert_not_impl_any!(Unichannel<i32>: Send, Sync);

type ImmediateChannel = Unichannel<i32>;
type StepwiseChannel = Unichannel<i32, ManualExecutor>;

#[test]
fn test_immediate_send_then_receive() {
    let ch = ImmediateChannel::new(InlineExecutor);
    let prod = ch.producer();
    let done = Rc::new(Cell::new(false));

    assert!(prod.send(42));

    let next = ch.next();
    {
        let done = Rc::clone(&done);
        spawn_detached(async move {
            let item = next.await?;
            assert_eq!(item, 42);
            done.set(true);
            Ok(())
        });
    }

    assert!(done.get());
}

#[test]
fn test_stepwise_send_then_receive() -> Result<()> {
    let dispatcher = ManualExecutor::new();
    let ch = StepwiseChannel::new(dispatcher.clone());
    let prod = ch.producer();
    let done = Rc::new(Cell::new(false));

    ensure!(prod.send(42));
    ensure!(dispatcher.run_one());
    ensure!(!dispatcher.run_one());

    let sub = ch.subscriber();
    let task = {
        let done = Rc::clone(&done);
        TaskHandle::<(), ManualExecutor>::new(async move {
            let item = sub.next().await?;
            assert_eq!(item, 42);
            done.set(true);
            Ok(())
        })
    };
    task.run(dispatcher.clone());

    // Consumer body, then the inner next-task taking the buffered item.
    ensure!(dispatcher.run_one());
    ensure!(dispatcher.run_one());
    ensure!(!done.get());

    // The consumer resumes with the item.
    ensure!(dispatcher.run_one());
    ensure!(!dispatcher.run_one());
    ensure!(done.get());
    ensure!(task.is_finished());
    Ok(())
}

#[test]
fn test_immediate_receive_then_send() {
    let ch = ImmediateChannel::new(InlineExecutor);
    let prod = ch.producer();
    let done = Rc::new(Cell::new(false));

    let sub = ch.subscriber();
    {
        let done = Rc::clone(&done);
        spawn_detached(async move {
            let item = sub.next().await?;
            assert_eq!(item, 42);
            done.set(true);
            Ok(())
        });
    }
    assert!(!done.get());

    assert!(prod.send(42));
    assert!(done.get());
}

#[test]
fn test_stepwise_receive_then_send() -> Result<()> {
    let dispatcher = ManualExecutor::new();
    let ch = StepwiseChannel::new(dispatcher.clone());
    let prod = ch.producer();
    let done = Rc::new(Cell::new(false));

    let sub = ch.subscriber();
    let task = {
        let done = Rc::clone(&done);
        TaskHandle::<(), ManualExecutor>::new(async move {
            let item = sub.next().await?;
            assert_eq!(item, 42);
            done.set(true);
            Ok(())
        })
    };
    task.run(dispatcher.clone());
    ensure!(dispatcher.run_all() == 2);
    ensure!(!done.get());

    ensure!(prod.send(42));
    // Delivery, the consumer's resume, the outer task's resume.
    ensure!(dispatcher.run_all() == 3);
    ensure!(done.get());
    ensure!(task.is_finished());
    Ok(())
}

#[test]
fn test_immediate_send_without_receiving() {
    let ch = ImmediateChannel::new(InlineExecutor);
    let prod = ch.producer();

    assert!(prod.send(42));

    drop(ch);

    assert!(!prod.send(43));
}

#[test]
fn test_stepwise_send_without_receiving() -> Result<()> {
    let dispatcher = ManualExecutor::new();
    let ch = StepwiseChannel::new(dispatcher.clone());
    let prod = ch.producer();

    ensure!(prod.send(42));
    ensure!(dispatcher.run_one());
    ensure!(!dispatcher.run_one());

    drop(ch);
    ensure!(!dispatcher.run_one());

    ensure!(!prod.send(43));
    ensure!(!dispatcher.run_one());
    Ok(())
}

#[test]
fn test_immediate_receive_without_sending() {
    let ch = ImmediateChannel::new(InlineExecutor);
    let done = Rc::new(Cell::new(false));

    let sub = ch.subscriber();
    {
        let done = Rc::clone(&done);
        spawn_detached(async move {
            match sub.next().await {
                Err(Cancelled) => {}
                Ok(_) => panic!("expected the channel to die first"),
            }
            done.set(true);
            Ok(())
        });
    }
    assert!(!done.get());

    drop(ch);
    assert!(done.get());
}

#[test]
fn test_stepwise_receive_without_sending() -> Result<()> {
    let dispatcher = ManualExecutor::new();
    let ch = StepwiseChannel::new(dispatcher.clone());
    let done = Rc::new(Cell::new(false));

    let sub = ch.subscriber();
    let task = {
        let done = Rc::clone(&done);
        TaskHandle::<(), ManualExecutor>::new(async move {
            match sub.next().await {
                Err(Cancelled) => {}
                Ok(_) => panic!("expected the channel to die first"),
            }
            done.set(true);
            Ok(())
        })
    };
    task.run(dispatcher.clone());
    ensure!(dispatcher.run_all() == 2);
    ensure!(!done.get());

    drop(ch);
    ensure!(dispatcher.run_all() == 2);
    ensure!(done.get());
    // The body caught the cancellation and finished normally.
    ensure!(task.is_finished());
    ensure!(!task.is_cancelled());
    Ok(())
}

#[test]
fn test_immediate_channel_cancels_waiting_task_when_it_dies() {
    let ch = ImmediateChannel::new(InlineExecutor);
    let sub = ch.subscriber();

    let task = TaskHandle::<()>::new(async move {
        let _item = sub.next().await?;
        Ok(())
    });
    assert!(!task.is_finished());

    task.run_default();
    assert!(!task.is_finished());

    drop(ch);
    assert!(task.is_cancelled());
}

#[test]
fn test_stepwise_channel_cancels_waiting_task_when_it_dies() -> Result<()> {
    let dispatcher = ManualExecutor::new();
    let ch = StepwiseChannel::new(dispatcher.clone());
    let sub = ch.subscriber();

    let task = TaskHandle::<(), ManualExecutor>::new(async move {
        let _item = sub.next().await?;
        Ok(())
    });
    task.run(dispatcher.clone());
    ensure!(dispatcher.run_all() == 2);
    ensure!(!task.is_finished());

    drop(ch);
    ensure!(dispatcher.run_all() == 2);
    ensure!(task.is_cancelled());
    Ok(())
}

#[test]
fn test_immediate_channel_preserves_send_order() {
    let ch = ImmediateChannel::new(InlineExecutor);
    let prod = ch.producer();
    let done = Rc::new(Cell::new(false));

    assert!(prod.send(42));
    assert!(prod.send(43));
    assert!(prod.send(44));

    let sub = ch.subscriber();
    {
        let done = Rc::clone(&done);
        spawn_detached(async move {
            assert_eq!(sub.next().await?, 42);
            assert_eq!(sub.next().await?, 43);
            assert_eq!(sub.next().await?, 44);
            match sub.next().await {
                Err(Cancelled) => {}
                Ok(_) => panic!("expected the channel to die first"),
            }
            done.set(true);
            Ok(())
        });
    }
    assert!(!done.get());

    drop(ch);
    assert!(done.get());
}

#[test]
fn test_stepwise_channel_preserves_send_order() -> Result<()> {
    let dispatcher = ManualExecutor::new();
    let ch = StepwiseChannel::new(dispatcher.clone());
    let prod = ch.producer();
    let done = Rc::new(Cell::new(false));

    ensure!(prod.send(42));
    ensure!(prod.send(43));
    ensure!(prod.send(44));

    let sub = ch.subscriber();
    let task = {
        let done = Rc::clone(&done);
        TaskHandle::<(), ManualExecutor>::new(async move {
            assert_eq!(sub.next().await?, 42);
            assert_eq!(sub.next().await?, 43);
            assert_eq!(sub.next().await?, 44);
            match sub.next().await {
                Err(Cancelled) => {}
                Ok(_) => panic!("expected the channel to die first"),
            }
            done.set(true);
            Ok(())
        })
    };
    task.run(dispatcher.clone());
    dispatcher.run_all();
    ensure!(!done.get());

    drop(ch);
    dispatcher.run_all();
    ensure!(done.get());
    ensure!(task.is_finished());
    Ok(())
}

#[test]
fn test_immediate_channel_honours_subscription_order() {
    let ch = ImmediateChannel::new(InlineExecutor);
    let prod = ch.producer();
    let done_first = Rc::new(Cell::new(false));
    let done_second = Rc::new(Cell::new(false));

    for (expected, done) in [(42, &done_first), (43, &done_second)] {
        let sub = ch.subscriber();
        let done = Rc::clone(done);
        spawn_detached(async move {
            assert_eq!(sub.next().await?, expected);
            match sub.next().await {
                Err(Cancelled) => {}
                Ok(_) => panic!("expected the channel to die first"),
            }
            done.set(true);
            Ok(())
        });
    }

    assert!(prod.send(42));
    assert!(prod.send(43));

    drop(ch);
    assert!(done_first.get());
    assert!(done_second.get());
}

#[test]
fn test_stepwise_channel_honours_subscription_order() -> Result<()> {
    let dispatcher = ManualExecutor::new();
    let ch = StepwiseChannel::new(dispatcher.clone());
    let prod = ch.producer();
    let done_first = Rc::new(Cell::new(false));
    let done_second = Rc::new(Cell::new(false));

    let mut tasks = Vec::new();
    for (expected, done) in [(42, &done_first), (43, &done_second)] {
        let sub = ch.subscriber();
        let done = Rc::clone(done);
        let task = TaskHandle::<(), ManualExecutor>::new(async move {
            assert_eq!(sub.next().await?, expected);
            done.set(true);
            // Unreached items: the channel dies while these wait.
            let _one_more = sub.next().await?;
            let _and_another = sub.next().await?;
            Ok(())
        });
        task.run(dispatcher.clone());
        tasks.push(task);
    }
    dispatcher.run_all();

    ensure!(prod.send(42));
    ensure!(prod.send(43));
    dispatcher.run_all();

    ensure!(done_first.get());
    ensure!(done_second.get());
    ensure!(!tasks[0].is_finished());
    ensure!(!tasks[1].is_finished());

    drop(ch);
    dispatcher.run_all();
    ensure!(tasks[0].is_cancelled());
    ensure!(tasks[1].is_cancelled());
    Ok(())
}

#[test]
fn test_immediate_channel_ignores_cancelled_consumers() {
    let ch = ImmediateChannel::new(InlineExecutor);
    let prod = ch.producer();
    let received_first = Rc::new(Cell::new(0));
    let received_second = Rc::new(Cell::new(0));

    let receive_one = |received: &Rc<Cell<i32>>| {
        let sub = ch.subscriber();
        let received = Rc::clone(received);
        TaskHandle::<()>::new(async move {
            received.set(sub.next().await?);
            Ok(())
        })
    };

    let first = receive_one(&received_first);
    first.run_default();
    let second = receive_one(&received_second);
    second.run_default();

    drop(first);

    assert!(prod.send(42));

    assert_eq!(received_first.get(), 0);
    assert_eq!(received_second.get(), 42);
    assert!(second.is_finished());
}

#[test]
fn test_stepwise_channel_ignores_cancelled_consumers() -> Result<()> {
    let dispatcher = ManualExecutor::new();
    let ch = StepwiseChannel::new(dispatcher.clone());
    let prod = ch.producer();
    let received_first = Rc::new(Cell::new(0));
    let received_second = Rc::new(Cell::new(0));

    let receive_one = |received: &Rc<Cell<i32>>| {
        let sub = ch.subscriber();
        let received = Rc::clone(received);
        TaskHandle::<(), ManualExecutor>::new(async move {
            received.set(sub.next().await?);
            Ok(())
        })
    };

    let first = receive_one(&received_first);
    first.run(dispatcher.clone());
    let second = receive_one(&received_second);
    second.run(dispatcher.clone());
    dispatcher.run_all();

    drop(first);

    ensure!(prod.send(42));
    dispatcher.run_all();

    ensure!(received_first.get() == 0);
    ensure!(received_second.get() == 42);
    ensure!(second.is_finished());
    Ok(())
}

#[test]
fn test_immediate_channel_buffers_item_when_all_consumers_cancelled() {
    let ch = ImmediateChannel::new(InlineExecutor);
    let prod = ch.producer();
    let received_first = Rc::new(Cell::new(0));
    let received_second = Rc::new(Cell::new(0));
    let received_third = Rc::new(Cell::new(0));

    let receive_one = |received: &Rc<Cell<i32>>| {
        let sub = ch.subscriber();
        let received = Rc::clone(received);
        TaskHandle::<()>::new(async move {
            received.set(sub.next().await?);
            Ok(())
        })
    };

    let first = receive_one(&received_first);
    first.run_default();
    let second = receive_one(&received_second);
    second.run_default();

    drop(first);
    drop(second);

    assert!(prod.send(42));
    assert_eq!(received_first.get(), 0);
    assert_eq!(received_second.get(), 0);

    // A fresh consumer picks up the buffered item.
    let third = receive_one(&received_third);
    third.run_default();
    assert_eq!(received_third.get(), 42);
    assert!(third.is_finished());
}

#[test]
fn test_stepwise_channel_buffers_item_when_all_consumers_cancelled() -> Result<()> {
    let dispatcher = ManualExecutor::new();
    let ch = StepwiseChannel::new(dispatcher.clone());
    let prod = ch.producer();
    let received_first = Rc::new(Cell::new(0));
    let received_second = Rc::new(Cell::new(0));
    let received_third = Rc::new(Cell::new(0));

    let receive_one = |received: &Rc<Cell<i32>>| {
        let sub = ch.subscriber();
        let received = Rc::clone(received);
        TaskHandle::<(), ManualExecutor>::new(async move {
            received.set(sub.next().await?);
            Ok(())
        })
    };

    let first = receive_one(&received_first);
    first.run(dispatcher.clone());
    let second = receive_one(&received_second);
    second.run(dispatcher.clone());
    dispatcher.run_all();

    drop(first);
    drop(second);

    ensure!(prod.send(42));
    dispatcher.run_all();
    ensure!(received_first.get() == 0);
    ensure!(received_second.get() == 0);

    let third = receive_one(&received_third);
    third.run(dispatcher.clone());
    dispatcher.run_all();
    ensure!(received_third.get() == 42);
    ensure!(third.is_finished());
    Ok(())
}
