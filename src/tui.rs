//! Console output macros.
//!
//! Every macro takes the message and, optionally, the `accessible` flag. In
//! accessible mode the coloured prefix is dropped so screen readers only get
//! the text.

/// Something went wrong or a capability is missing.
#[macro_export]
macro_rules! warning {
    ($name:expr) => {
        println!("{} {}", colored::Colorize::bold(colored::Colorize::red("[!]")), $name);
    };
    ($name:expr, $accessible:expr) => {
        if $accessible {
            println!("{}", $name);
        } else {
            println!("{} {}", colored::Colorize::bold(colored::Colorize::red("[!]")), $name);
        }
    };
}

/// Progress of a module.
#[macro_export]
macro_rules! detail {
    ($name:expr) => {
        println!("{} {}", colored::Colorize::bold(colored::Colorize::blue("[~]")), $name);
    };
    ($name:expr, $accessible:expr) => {
        if $accessible {
            println!("{}", $name);
        } else {
            println!("{} {}", colored::Colorize::bold(colored::Colorize::blue("[~]")), $name);
        }
    };
}

/// A finding.
#[macro_export]
macro_rules! output {
    ($name:expr) => {
        println!(
            "{} {}",
            colored::Colorize::bold(colored::Colorize::truecolor("[>]", 0, 255, 9)),
            $name
        );
    };
    ($name:expr, $accessible:expr) => {
        if $accessible {
            println!("{}", $name);
        } else {
            println!(
                "{} {}",
                colored::Colorize::bold(colored::Colorize::truecolor("[>]", 0, 255, 9)),
                $name
            );
        }
    };
}

/// Prints the banner shown at startup.
#[macro_export]
macro_rules! funny_opening {
    () => {
        println!(
            "{}",
            colored::Colorize::green(concat!(
                ".----. .----.  .----. .---. .---. .----..----.\n",
                "{ {__  | {}  }/  {}  \\{_   _}{_   _}| {_  | {}  }\n",
                ".-._} }| .--' \\      /  | |    | |  | {__ | .-. \\\n",
                "`----' `-'     `----'   `-'    `-'  `----'`-' `-'"
            ))
        );
    };
}
