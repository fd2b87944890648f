use std::env;

#[derive(Clone)]
pub struct StripeSettings {
    pub secret_key: String,
    pub publishable_key: String,
    pub webhook_secret: String,
    /// Default price for the paid plan when the client does not pick one.
    pub price_id: String,
}

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub frontend_origin: String,
    pub stripe: StripeSettings,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok(); // Load .env file

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let frontend_origin = env::var("FRONTEND_ORIGIN").expect("FRONTEND_ORIGIN must be set");

        let stripe = StripeSettings {
            secret_key: env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY must be set"),
            publishable_key: env::var("STRIPE_PUBLISHABLE_KEY")
                .expect("STRIPE_PUBLISHABLE_KEY must be set"),
            webhook_secret: env::var("STRIPE_WEBHOOK_SECRET")
                .expect("STRIPE_WEBHOOK_SECRET must be set"),
            price_id: env::var("STRIPE_PRICE_ID").expect("STRIPE_PRICE_ID must be set"),
        };

        Config {
            database_url,
            frontend_origin,
            stripe,
        }
    }
}
