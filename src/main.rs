#[rocket::launch]
fn rocket() -> _ {
    envelope_gateway::rocket()
}
