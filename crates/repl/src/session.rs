//! The interactive command loop: read a line, parse it, run it, display.

use anyhow::Result;
use common::pretty::{self, TableStyleKind};
use common::DbResult;
use database::Database;
use log::error;
use parser::{parse_line, Command};
use std::io::{BufRead, Write};

/// Drive the session until `quit` or end of input, then close the database.
pub fn run(mut db: Database, input: &mut dyn BufRead, interactive: bool) -> Result<()> {
    if interactive {
        banner();
    }
    let mut line = String::new();
    loop {
        if interactive {
            print!("blockdb> ");
            std::io::stdout().flush()?;
        }
        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => {
                if let Err(err) = execute(&mut db, command) {
                    error!("{}", err);
                }
            }
            // A bad line is reported and dropped; the session continues.
            Err(err) => error!("{}", err),
        }
    }
    db.close()?;
    Ok(())
}

fn execute(db: &mut Database, command: Command) -> DbResult<()> {
    match command {
        Command::Help => {
            show_help();
            Ok(())
        }
        Command::Quit => Ok(()),
        Command::Print(text) => {
            println!("{}", text);
            Ok(())
        }
        Command::ShowDatabase => show_database(db),
        Command::CreateTable { name, fields } => db.create_table(&name, &fields),
        Command::DropTable { name } => db.drop_table(&name),
        Command::Insert { table, values } => db.insert(&table, values),
        Command::Select(query) => {
            let batch = db.select(&query)?;
            println!(
                "{}",
                pretty::render_record_batch(&batch, TableStyleKind::Modern)
            );
            Ok(())
        }
    }
}

fn show_database(db: &mut Database) -> DbResult<()> {
    println!("====== database at {}", db.dir().display());
    for summary in db.table_summaries()? {
        println!(
            "-- {}: {} field(s), {} bytes per record",
            summary.name,
            summary.fields.len(),
            summary.record_len
        );
        for (name, ty, offset) in &summary.fields {
            println!("     \"{}\" {}, offset {}", name, ty, offset);
        }
        println!(
            "   {} block(s), {} record(s)",
            summary.num_blocks, summary.num_records
        );
    }
    println!("======");
    Ok(())
}

fn banner() {
    println!("Welcome to the blockdb session");
    println!("  - enter \"help\" for instructions");
    println!("  - enter \"quit\" to leave the session");
}

fn show_help() {
    println!("You can run the following commands:");
    println!(" - help");
    println!(" - quit");
    println!(" - # some comments in the rest of a line");
    println!(" - print text");
    println!(" - show database");
    println!(" - create table table_name ( field_name field_type, ... )");
    println!(" - drop table table_name; (CAUTION: data will be moved aside)");
    println!(" - insert into table_name values ( value_1, value_2, ... );");
    println!(" - select attr1, attr2 from table_name [natural join table_2] [where attr = int_val];");
    println!();
}
