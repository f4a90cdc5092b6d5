//! SUBSCRIBE / UNSUBSCRIBE / PUBLISH
//!
//! Confirmations and messages are three-element arrays:
//!
//! ```text
//! subscribe   <channel> <subscription count>
//! unsubscribe <channel> <subscription count>
//! message     <channel> <payload>
//! ```

use super::{bulk, flags, CommandResult, CommandSpec, Reply};
use crate::connection::ClientId;
use crate::protocol::{Request, RespValue};
use crate::server::Server;
use bytes::Bytes;
use tracing::warn;

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "SUBSCRIBE",
        arity: -2,
        flags: flags::PUBSUB,
        handler: subscribe,
    },
    CommandSpec {
        name: "UNSUBSCRIBE",
        arity: -1,
        flags: flags::PUBSUB,
        handler: unsubscribe,
    },
    CommandSpec {
        name: "PUBLISH",
        arity: 3,
        flags: 0,
        handler: publish,
    },
];

fn confirmation(kind: &'static str, channel: Option<Bytes>, count: usize) -> RespValue {
    RespValue::array(vec![
        bulk(kind),
        RespValue::from(channel),
        RespValue::integer(count as i64),
    ])
}

/// SUBSCRIBE channel [channel ...]
///
/// Each channel is handled independently; subscribing twice to the same
/// channel still produces a confirmation.
fn subscribe(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    let mut replies = Vec::with_capacity(req.args.len());
    for channel in &req.args {
        server.pubsub.subscribe(channel.clone(), id);
        let client = server.require_client(id)?;
        client.subscriptions.insert(channel.clone());
        replies.push(confirmation(
            "subscribe",
            Some(channel.clone()),
            client.subscriptions.len(),
        ));
    }
    Ok(Reply::Multiple(replies))
}

/// UNSUBSCRIBE [channel ...]
///
/// Without arguments the client leaves every channel it is subscribed to.
fn unsubscribe(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    let channels: Vec<Bytes> = if req.args.is_empty() {
        let mut all: Vec<Bytes> = server
            .require_client(id)?
            .subscriptions
            .iter()
            .cloned()
            .collect();
        all.sort();
        all
    } else {
        req.args.clone()
    };

    if channels.is_empty() {
        return Ok(confirmation("unsubscribe", None, 0).into());
    }

    let mut replies = Vec::with_capacity(channels.len());
    for channel in channels {
        server.pubsub.unsubscribe(&channel, id);
        let client = server.require_client(id)?;
        client.subscriptions.remove(&channel);
        let remaining = client.subscriptions.len();
        replies.push(confirmation("unsubscribe", Some(channel), remaining));
    }
    Ok(Reply::Multiple(replies))
}

/// PUBLISH channel message
///
/// Replies with the number of clients that received the message. A
/// subscriber whose unsent output reaches `pubsub_output_limit` loses its
/// buffered messages and is disconnected.
fn publish(server: &mut Server, _id: ClientId, req: &Request) -> CommandResult {
    let channel = &req.args[0];
    let message = RespValue::array(vec![
        bulk("message"),
        RespValue::BulkString(channel.clone()),
        RespValue::BulkString(req.args[1].clone()),
    ])
    .serialize();

    let limit = server.config.pubsub_output_limit;
    let subscribers = server.pubsub.subscribers(channel).to_vec();
    let mut receivers = 0;
    for subscriber in &subscribers {
        let Some(client) = server.clients.get_mut(subscriber) else {
            continue;
        };
        if client.close_after_reply {
            continue;
        }
        client.reply_raw(&message);
        receivers += 1;

        if limit > 0 && client.output.len() >= limit {
            warn!(client = %subscriber, pending = client.output.len(), limit, "Subscriber output over limit, closing connection");
            client.output.clear();
            client.close_after_reply = true;
        }
    }

    Ok(RespValue::integer(receivers).into())
}

#[cfg(test)]
mod tests {
    use super::confirmation;
    use crate::config::Config;
    use crate::server::test_support::*;
    use crate::server::Server;
    use bytes::Bytes;

    fn confirm(kind: &'static str, channel: &str, count: usize) -> Vec<u8> {
        confirmation(kind, Some(Bytes::from(channel.to_string())), count).serialize()
    }

    #[test]
    fn test_subscribe_confirms_each_channel() {
        let mut server = server();
        let c = connect(&mut server);

        let mut expected = confirm("subscribe", "a", 1);
        expected.extend(confirm("subscribe", "b", 2));
        expected.extend(confirm("subscribe", "a", 2));
        assert_eq!(run(&mut server, c, &["SUBSCRIBE", "a", "b", "a"]), expected);
        assert_eq!(server.pubsub.subscribers(b"a"), &[c]);
    }

    #[test]
    fn test_publish_fans_out() {
        let mut server = server();
        let s1 = connect(&mut server);
        let s2 = connect(&mut server);
        let publisher = connect(&mut server);

        run(&mut server, s1, &["SUBSCRIBE", "news"]);
        run(&mut server, s2, &["SUBSCRIBE", "news", "other"]);

        assert_eq!(run(&mut server, publisher, &["PUBLISH", "news", "hi"]), b":2\r\n");
        assert_eq!(run(&mut server, publisher, &["PUBLISH", "empty", "hi"]), b":0\r\n");

        let message = b"*3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$2\r\nhi\r\n";
        assert_eq!(&server.take_output(s1)[..], &message[..]);
        assert_eq!(&server.take_output(s2)[..], &message[..]);
        assert!(server.take_output(publisher).is_empty());
    }

    #[test]
    fn test_slow_subscriber_is_dropped() {
        let mut server = Server::new(Config {
            pubsub_output_limit: 128,
            ..Config::default()
        });
        let slow = connect(&mut server);
        let fast = connect(&mut server);
        let publisher = connect(&mut server);

        run(&mut server, slow, &["SUBSCRIBE", "news"]);
        run(&mut server, fast, &["SUBSCRIBE", "news"]);

        for _ in 0..3 {
            assert_eq!(run(&mut server, publisher, &["PUBLISH", "news", "hello"]), b":2\r\n");
            server.take_output(fast);
        }

        // the fourth message pushes the unread backlog past the limit
        assert_eq!(run(&mut server, publisher, &["PUBLISH", "news", "hello"]), b":2\r\n");
        let client = server.client(slow).unwrap();
        assert!(client.close_after_reply);
        assert!(!client.has_pending_output());

        assert_eq!(run(&mut server, publisher, &["PUBLISH", "news", "hello"]), b":1\r\n");
        assert!(server.take_output(slow).is_empty());
        assert!(!server.take_output(fast).is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let mut server = server();
        let c = connect(&mut server);

        run(&mut server, c, &["SUBSCRIBE", "a", "b"]);
        assert_eq!(
            run(&mut server, c, &["UNSUBSCRIBE", "a"]),
            confirm("unsubscribe", "a", 1)
        );

        let mut expected = confirm("unsubscribe", "b", 0);
        assert_eq!(run(&mut server, c, &["UNSUBSCRIBE"]), expected);

        expected = b"*3\r\n$11\r\nunsubscribe\r\n$-1\r\n:0\r\n".to_vec();
        assert_eq!(run(&mut server, c, &["UNSUBSCRIBE"]), expected);
        assert_eq!(server.pubsub.channel_count(), 0);
    }

    #[test]
    fn test_subscribe_mode_restricts_commands() {
        let mut server = server();
        let c = connect(&mut server);

        run(&mut server, c, &["SUBSCRIBE", "a"]);
        assert_eq!(
            run(&mut server, c, &["GET", "k"]),
            b"-ERR Can't execute 'get': only SUBSCRIBE / UNSUBSCRIBE / PING / QUIT are allowed in this context\r\n"
        );
        assert_eq!(run(&mut server, c, &["PING"]), b"+PONG\r\n");

        run(&mut server, c, &["UNSUBSCRIBE"]);
        assert_eq!(run(&mut server, c, &["GET", "k"]), b"$-1\r\n");
    }
}
