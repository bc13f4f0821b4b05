use std::{
    fs::File,
    io::{self, Read, Write},
};

use clap::{CommandFactory, Parser};
use ferry::{
    cli::{FerryArgs, FerrySubcommand},
    exec, GetOptions, MkdirOptions, PutOptions, RemoveOptions, StatOptions,
};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // a re-executed copier child takes over here and never returns
    ferry::exec::reexec::child_init();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let args = FerryArgs::parse();
    match args.subcommand {
        Some(FerrySubcommand::Eval { root, directory }) => {
            let evaluated = exec::eval(&root, &directory)?;
            println!("{}", evaluated.display());
        }
        Some(FerrySubcommand::Stat {
            root,
            directory,
            excludes,
            check_archives,
            globs,
        }) => {
            let options = StatOptions::builder()
                .excludes(excludes)
                .check_for_archives(check_archives)
                .build();
            let results = exec::stat(&root, &directory, options, &globs)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Some(FerrySubcommand::Get {
            root,
            directory,
            excludes,
            output,
            keep_directory_names,
            no_deref_symlinks,
            ignore_unreadable,
            parents,
            globs,
        }) => {
            let options = GetOptions::builder()
                .excludes(excludes)
                .keep_directory_names(keep_directory_names)
                .no_deref_symlinks(no_deref_symlinks)
                .ignore_unreadable(ignore_unreadable)
                .parents(parents)
                .build();
            let writer: Box<dyn Write + Send> = match output {
                Some(path) => Box::new(File::create(path)?),
                None => Box::new(io::stdout()),
            };
            exec::get(&root, &directory, options, &globs, writer)?;
        }
        Some(FerrySubcommand::Put {
            root,
            directory,
            input,
            ignore_devices,
            no_overwrite_dir_non_dir,
            no_overwrite_non_dir_dir,
        }) => {
            let options = PutOptions::builder()
                .ignore_devices(ignore_devices)
                .no_overwrite_dir_non_dir(no_overwrite_dir_non_dir)
                .no_overwrite_non_dir_dir(no_overwrite_non_dir_dir)
                .build();
            let reader: Box<dyn Read + Send> = match input {
                Some(path) => Box::new(File::open(path)?),
                None => Box::new(io::stdin()),
            };
            exec::put(&root, &directory, options, reader)?;
        }
        Some(FerrySubcommand::Mkdir {
            root,
            directory,
            mode,
        }) => {
            let options = match mode {
                Some(mode) => MkdirOptions::builder()
                    .chmod_new(u32::from_str_radix(&mode, 8)?)
                    .build(),
                None => MkdirOptions::builder().build(),
            };
            exec::mkdir(&root, &directory, options)?;
        }
        Some(FerrySubcommand::Remove { root, item, all }) => {
            exec::remove(&root, &item, RemoveOptions::builder().all(all).build())?;
        }
        None => {
            if args.version {
                println!("ferry {}", env!("CARGO_PKG_VERSION"));
            } else {
                FerryArgs::command().print_help()?;
            }
        }
    }

    Ok(())
}
