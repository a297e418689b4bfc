//! Terminal front end: fill in the form from the command line, watch the post
//! stream in, press Ctrl-C to stop.

// Note: This uses blocking calls for simplicity such as `print` and `write`.
// Output is small and goes to a terminal.

use clap::Parser;
use contentcraft::{
    session::Framing, stream::Outcome, Client, Form, Generator, LengthClass,
    Model, Tone,
};
use std::{io::Write, path::PathBuf};

/// Generate a blog post about the given keywords.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// What to write about.
    keywords: String,
    /// Tone of the post.
    #[arg(short, long, value_enum, default_value_t = Tone::default())]
    tone: Tone,
    /// Length of the post.
    #[arg(short, long, value_enum, default_value_t = LengthClass::default())]
    length: LengthClass,
    /// Model to generate with.
    #[arg(short, long, value_enum, default_value_t = Model::default())]
    model: Model,
    /// Origin serving the completion endpoints.
    #[arg(long, default_value = Client::DEFAULT_BASE_URL)]
    base_url: String,
    /// Show the response body as received, event framing included.
    #[arg(long)]
    raw: bool,
    /// Also write the finished post to this file.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Read the command line arguments.
    let args = Args::parse();

    let form = Form {
        keywords: args.keywords,
        tone: args.tone,
        length: args.length,
        model: args.model,
    };

    let framing = if args.raw {
        Framing::Raw
    } else {
        Framing::Events
    };
    let mut generator =
        Generator::new(Client::new(args.base_url)?).framing(framing);

    // Empty keywords end here, before anything is sent.
    let mut session = generator.generate(&form)?;

    println!("Blog Post: {}\n", form.keywords);

    let mut task = tokio::spawn(async move {
        session
            .run(|chunk| {
                print!("{}", chunk);
                std::io::stdout().flush().ok();
            })
            .await
    });

    let outcome = tokio::select! {
        outcome = &mut task => outcome??,
        _ = tokio::signal::ctrl_c() => {
            generator.stop();
            (&mut task).await??
        }
    };

    match outcome {
        Outcome::Finished { text } => {
            println!("\n\nPost generated.");
            if let Some(path) = args.output {
                std::fs::write(path, text)?;
            }
        }
        Outcome::Aborted => {
            println!("\n\nStopped.");
            // What was shown so far is kept.
            if let Some(path) = args.output {
                std::fs::write(path, generator.display().shown())?;
            }
        }
    }

    Ok(())
}
