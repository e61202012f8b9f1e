//! One handler per verb, collected into a registry the server owns. Arity
//! checks happen here; everything else is delegated to the engine.

use crate::error::{ServerError, ServerResult};
use crate::resp::Reply;
use ember_core::Db;
use std::collections::HashMap;

pub type CmdFn = fn(&Db, &[Vec<u8>]) -> ServerResult<Reply>;

/// Builds the verb registry. Lookup keys are lowercase; the connection loop
/// lowercases incoming verbs before dispatch.
pub fn registry() -> HashMap<&'static str, CmdFn> {
    let mut commands: HashMap<&'static str, CmdFn> = HashMap::new();
    commands.insert("hset", hset);
    commands.insert("hsetnx", hsetnx);
    commands.insert("hget", hget);
    commands.insert("hgetall", hgetall);
    commands.insert("hdel", hdel);
    commands.insert("hexists", hexists);
    commands.insert("hlen", hlen);
    commands.insert("hkeys", hkeys);
    commands.insert("hvals", hvals);
    commands.insert("hclear", hclear);
    commands.insert("hexpire", hexpire);
    commands.insert("httl", httl);
    commands
}

fn bulk_array(items: Vec<Vec<u8>>) -> Reply {
    Reply::Array(items.into_iter().map(Reply::Bulk).collect())
}

fn hset(db: &Db, args: &[Vec<u8>]) -> ServerResult<Reply> {
    if args.len() != 3 {
        return Err(ServerError::WrongNumArgs("hset"));
    }
    let count = db.hset(&args[0], &args[1], &args[2])?;
    Ok(Reply::Integer(count as i64))
}

fn hsetnx(db: &Db, args: &[Vec<u8>]) -> ServerResult<Reply> {
    if args.len() != 3 {
        return Err(ServerError::WrongNumArgs("hsetnx"));
    }
    let inserted = db.hsetnx(&args[0], &args[1], &args[2])?;
    Ok(Reply::Integer(inserted as i64))
}

fn hget(db: &Db, args: &[Vec<u8>]) -> ServerResult<Reply> {
    if args.len() != 2 {
        return Err(ServerError::SyntaxIncorrect);
    }
    match db.hget(&args[0], &args[1])? {
        Some(value) => Ok(Reply::Bulk(value)),
        None => Ok(Reply::Nil),
    }
}

fn hgetall(db: &Db, args: &[Vec<u8>]) -> ServerResult<Reply> {
    if args.len() != 1 {
        return Err(ServerError::WrongNumArgs("hgetall"));
    }
    Ok(bulk_array(db.hgetall(&args[0])?))
}

fn hdel(db: &Db, args: &[Vec<u8>]) -> ServerResult<Reply> {
    if args.len() < 2 {
        return Err(ServerError::WrongNumArgs("hdel"));
    }
    let fields: Vec<&[u8]> = args[1..].iter().map(Vec::as_slice).collect();
    let removed = db.hdel(&args[0], &fields)?;
    Ok(Reply::Integer(removed as i64))
}

fn hexists(db: &Db, args: &[Vec<u8>]) -> ServerResult<Reply> {
    if args.len() != 2 {
        return Err(ServerError::WrongNumArgs("hexists"));
    }
    Ok(Reply::Integer(db.hexists(&args[0], &args[1])? as i64))
}

fn hlen(db: &Db, args: &[Vec<u8>]) -> ServerResult<Reply> {
    if args.len() != 1 {
        return Err(ServerError::WrongNumArgs("hlen"));
    }
    Ok(Reply::Integer(db.hlen(&args[0])? as i64))
}

fn hkeys(db: &Db, args: &[Vec<u8>]) -> ServerResult<Reply> {
    if args.len() != 1 {
        return Err(ServerError::SyntaxIncorrect);
    }
    Ok(bulk_array(db.hkeys(&args[0])?))
}

fn hvals(db: &Db, args: &[Vec<u8>]) -> ServerResult<Reply> {
    if args.len() != 1 {
        return Err(ServerError::WrongNumArgs("hvals"));
    }
    Ok(bulk_array(db.hvals(&args[0])?))
}

fn hclear(db: &Db, args: &[Vec<u8>]) -> ServerResult<Reply> {
    if args.len() != 1 {
        return Err(ServerError::WrongNumArgs("hclear"));
    }
    Ok(Reply::Integer(db.hclear(&args[0])? as i64))
}

fn hexpire(db: &Db, args: &[Vec<u8>]) -> ServerResult<Reply> {
    if args.len() != 2 {
        return Err(ServerError::WrongNumArgs("hexpire"));
    }
    let seconds: i64 = std::str::from_utf8(&args[1])
        .ok()
        .and_then(|raw| raw.parse().ok())
        .ok_or(ServerError::SyntaxIncorrect)?;
    let set = db.hexpire(&args[0], seconds)?;
    Ok(Reply::Integer(set as i64))
}

fn httl(db: &Db, args: &[Vec<u8>]) -> ServerResult<Reply> {
    if args.len() != 1 {
        return Err(ServerError::WrongNumArgs("httl"));
    }
    Ok(Reply::Integer(db.httl(&args[0])?))
}
