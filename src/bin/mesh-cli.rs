use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "mesh-cli")]
#[command(about = "Call the svc-mesh HTTP gateways", long_about = None)]
struct Cli {
    /// Gateway base URL; defaults to the auth service.
    #[arg(short, long, default_value = "http://localhost:8081", env = "MESH_GATEWAY_URL")]
    url: String,

    /// W3C traceparent to start the call under.
    #[arg(long)]
    traceparent: Option<String>,

    /// W3C baggage entries, `key=value,key=value`.
    #[arg(long)]
    baggage: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the service is serving
    Health,
    /// Ping through the chain
    Ping,
    /// Log in (auth service)
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        password: String,
    },
    /// Look up a user (user service)
    User {
        #[arg(long)]
        email: String,
    },
    /// Look up a product (product service)
    Product {
        #[arg(long)]
        id: String,
    },
    /// Print the service's Swagger document
    Docs {
        /// Role whose document to fetch.
        #[arg(long, default_value = "auth")]
        role: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    if let Some(traceparent) = &cli.traceparent {
        headers.insert("traceparent", HeaderValue::from_str(traceparent)?);
    }
    if let Some(baggage) = &cli.baggage {
        headers.insert("baggage", HeaderValue::from_str(baggage)?);
    }

    let request = match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/health", base)).send().await?;
            println!("{} {}", res.status(), res.text().await?);
            return Ok(());
        }
        Commands::Ping => client.get(format!("{}/v1/ping", base)),
        Commands::Login { email, password } => client
            .post(format!("{}/v1/auth/login", base))
            .json(&json!({ "email": email, "password": password })),
        Commands::User { email } => client.get(format!("{}/v1/users/email/{}", base, email)),
        Commands::Product { id } => client.get(format!("{}/v1/products/{}", base, id)),
        Commands::Docs { role } => client.get(format!("{}/{}/swagger.json", base, role)),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    let body = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|json| serde_json::to_string_pretty(&json).ok())
        .unwrap_or(text);

    if status.is_success() {
        println!("{}", body);
    } else {
        eprintln!("Error: gateway returned status {}", status);
        eprintln!("{}", body);
        std::process::exit(1);
    }
    Ok(())
}
