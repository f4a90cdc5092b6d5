//! Connection and server commands.

use super::{flags, parse_i64, CommandError, CommandResult, CommandSpec};
use crate::connection::ClientId;
use crate::protocol::{Request, RespValue};
use crate::server::Server;
use bytes::Bytes;
use std::fmt::Write;

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "PING",
        arity: -1,
        flags: flags::PUBSUB,
        handler: ping,
    },
    CommandSpec {
        name: "ECHO",
        arity: 2,
        flags: 0,
        handler: echo,
    },
    CommandSpec {
        name: "QUIT",
        arity: 1,
        flags: flags::PUBSUB | flags::NO_QUEUE,
        handler: quit,
    },
    CommandSpec {
        name: "AUTH",
        arity: -2,
        flags: flags::NO_QUEUE,
        handler: auth,
    },
    CommandSpec {
        name: "SELECT",
        arity: 2,
        flags: 0,
        handler: select,
    },
    CommandSpec {
        name: "INFO",
        arity: -1,
        flags: 0,
        handler: info,
    },
    CommandSpec {
        name: "DBSIZE",
        arity: 1,
        flags: 0,
        handler: dbsize,
    },
    CommandSpec {
        name: "FLUSHDB",
        arity: 1,
        flags: flags::WRITE,
        handler: flushdb,
    },
    CommandSpec {
        name: "FLUSHALL",
        arity: 1,
        flags: flags::WRITE,
        handler: flushall,
    },
];

/// PING [message]
fn ping(_server: &mut Server, _id: ClientId, req: &Request) -> CommandResult {
    match req.args.as_slice() {
        [] => Ok(RespValue::pong().into()),
        [message] => Ok(RespValue::BulkString(message.clone()).into()),
        _ => Err(CommandError::WrongArity("ping".to_string())),
    }
}

/// ECHO message
fn echo(_server: &mut Server, _id: ClientId, req: &Request) -> CommandResult {
    Ok(RespValue::BulkString(req.args[0].clone()).into())
}

/// QUIT: replies OK, then the connection is closed once the reply is flushed.
fn quit(server: &mut Server, id: ClientId, _req: &Request) -> CommandResult {
    server.require_client(id)?.close_after_reply = true;
    Ok(RespValue::ok().into())
}

/// AUTH [username] password
///
/// There is no access control; any credentials are accepted.
fn auth(_server: &mut Server, _id: ClientId, req: &Request) -> CommandResult {
    if req.args.len() > 2 {
        return Err(CommandError::Syntax);
    }
    Ok(RespValue::ok().into())
}

/// SELECT index
fn select(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    let index = parse_i64(&req.args[0])?;
    let db = server
        .keyspace
        .select(index)
        .ok_or(CommandError::DbIndexOutOfRange)?;
    server.require_client(id)?.db = db;
    Ok(RespValue::ok().into())
}

/// DBSIZE
fn dbsize(server: &mut Server, id: ClientId, _req: &Request) -> CommandResult {
    let db = server.client_db(id)?;
    Ok(RespValue::integer(server.keyspace.db(db).len() as i64).into())
}

/// FLUSHDB
fn flushdb(server: &mut Server, id: ClientId, _req: &Request) -> CommandResult {
    let db = server.client_db(id)?;
    server.keyspace.db_mut(db).flush();
    Ok(RespValue::ok().into())
}

/// FLUSHALL
fn flushall(server: &mut Server, _id: ClientId, _req: &Request) -> CommandResult {
    server.keyspace.flush_all();
    Ok(RespValue::ok().into())
}

/// INFO [section]
///
/// Always renders every section.
fn info(server: &mut Server, _id: ClientId, _req: &Request) -> CommandResult {
    Ok(RespValue::BulkString(Bytes::from(render_info(server))).into())
}

fn render_info(server: &Server) -> String {
    let stats = server.stats();
    let config = server.config();
    let uptime = server.now().saturating_duration_since(server.started);
    let used = server.keyspace.used_memory();

    let mut out = String::new();
    // writing into a String cannot fail
    let _ = write!(
        out,
        "# Server\r\n\
         boltkv_version:{}\r\n\
         os:{}\r\n\
         arch_bits:{}\r\n\
         process_id:{}\r\n\
         tcp_port:{}\r\n\
         uptime_in_seconds:{}\r\n\
         hz:{}\r\n\
         \r\n\
         # Clients\r\n\
         connected_clients:{}\r\n\
         blocked_clients:{}\r\n\
         \r\n\
         # Memory\r\n\
         used_memory:{}\r\n\
         used_memory_human:{:.2}K\r\n\
         maxmemory:{}\r\n\
         maxmemory_policy:{}\r\n\
         \r\n\
         # Stats\r\n\
         total_connections_received:{}\r\n\
         total_commands_processed:{}\r\n\
         expired_keys:{}\r\n\
         evicted_keys:{}\r\n\
         rejected_writes:{}\r\n\
         keyspace_hits:{}\r\n\
         keyspace_misses:{}\r\n\
         pubsub_channels:{}\r\n\
         \r\n\
         # Keyspace\r\n",
        crate::VERSION,
        std::env::consts::OS,
        usize::BITS,
        std::process::id(),
        config.port,
        uptime.as_secs(),
        config.tick_hz,
        server.client_count(),
        server.blocked_count(),
        used,
        used as f64 / 1024.0,
        config.max_memory,
        config.eviction_policy,
        stats.connections_received,
        stats.commands_processed,
        server.keyspace.expired_keys(),
        stats.evicted_keys,
        stats.rejected_writes,
        stats.keyspace_hits,
        stats.keyspace_misses,
        server.pubsub.channel_count(),
    );

    for db in server.keyspace.iter().filter(|db| !db.is_empty()) {
        let _ = write!(
            out,
            "db{}:keys={},expires={}\r\n",
            db.id(),
            db.len(),
            db.expires_len()
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use crate::server::test_support::*;

    #[test]
    fn test_ping_and_echo() {
        let mut server = server();
        let c = connect(&mut server);

        assert_eq!(run(&mut server, c, &["PING"]), b"+PONG\r\n");
        assert_eq!(run(&mut server, c, &["ping", "hello"]), bulk("hello").serialize());
        assert_eq!(
            run(&mut server, c, &["PING", "a", "b"]),
            b"-ERR wrong number of arguments for 'ping' command\r\n"
        );
        assert_eq!(run(&mut server, c, &["ECHO", "hi"]), bulk("hi").serialize());
    }

    #[test]
    fn test_auth_is_accepted() {
        let mut server = server();
        let c = connect(&mut server);
        assert_eq!(run(&mut server, c, &["AUTH", "secret"]), b"+OK\r\n");
        assert_eq!(run(&mut server, c, &["AUTH", "user", "secret"]), b"+OK\r\n");
    }

    #[test]
    fn test_select_isolates_databases() {
        let mut server = server();
        let c = connect(&mut server);

        run(&mut server, c, &["SET", "k", "zero"]);
        assert_eq!(run(&mut server, c, &["SELECT", "15"]), b"+OK\r\n");
        assert_eq!(run(&mut server, c, &["GET", "k"]), b"$-1\r\n");
        run(&mut server, c, &["SET", "k", "fifteen"]);
        assert_eq!(run(&mut server, c, &["DBSIZE"]), b":1\r\n");

        assert_eq!(
            run(&mut server, c, &["SELECT", "16"]),
            b"-ERR DB index is out of range\r\n"
        );
        assert_eq!(
            run(&mut server, c, &["SELECT", "one"]),
            b"-ERR value is not an integer or out of range\r\n"
        );

        run(&mut server, c, &["SELECT", "0"]);
        assert_eq!(run(&mut server, c, &["GET", "k"]), bulk("zero").serialize());
    }

    #[test]
    fn test_flushdb_and_flushall() {
        let mut server = server();
        let c = connect(&mut server);

        run(&mut server, c, &["SET", "a", "1"]);
        run(&mut server, c, &["SELECT", "1"]);
        run(&mut server, c, &["SET", "b", "1"]);

        assert_eq!(run(&mut server, c, &["FLUSHDB"]), b"+OK\r\n");
        assert_eq!(run(&mut server, c, &["DBSIZE"]), b":0\r\n");
        assert_eq!(server.keyspace().total_keys(), 1);

        assert_eq!(run(&mut server, c, &["FLUSHALL"]), b"+OK\r\n");
        assert_eq!(server.keyspace().total_keys(), 0);
    }

    #[test]
    fn test_quit_closes_after_reply() {
        let mut server = server();
        let c = connect(&mut server);

        let mut input = encode(&["QUIT"]);
        input.extend_from_slice(&encode(&["PING"]));
        server.feed(c, &input);
        server.process_input(c);

        assert_eq!(&server.take_output(c)[..], b"+OK\r\n");
        assert!(server.client(c).unwrap().close_after_reply);
    }

    #[test]
    fn test_info_sections() {
        let mut server = server();
        let c = connect(&mut server);

        run(&mut server, c, &["SET", "k", "v"]);
        run(&mut server, c, &["EXPIRE", "k", "100"]);
        let reply = String::from_utf8(run(&mut server, c, &["INFO"])).unwrap();

        for needle in [
            "# Server",
            "boltkv_version:",
            "connected_clients:1",
            "maxmemory_policy:noeviction",
            "total_commands_processed:3",
            "db0:keys=1,expires=1",
        ] {
            assert!(reply.contains(needle), "missing {}", needle);
        }
        assert!(!reply.contains("db1:"));
    }
}
