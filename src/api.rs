use rocket::Route;

mod common;
mod elections;
mod posts;
mod results;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(elections::routes());
    routes.extend(posts::routes());
    routes.extend(voting::routes());
    routes.extend(results::routes());
    routes
}
