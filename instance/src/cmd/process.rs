use instance::SingleInstance;

pub(crate) async fn run_process(ctx: &crate::Ctx, args: Vec<String>) -> anyhow::Result<i32> {
    let mut instance = SingleInstance::new(ctx.config.clone());
    if !instance.process(&args).await {
        eprintln!("could not hand arguments to the running instance");
        return Ok(1);
    }
    if !instance.is_master() {
        // Delivered; the master has them now.
        return Ok(0);
    }

    println!("instance running: id={}", instance.instance_id());
    println!("start another with --quit as first argument to exit");
    loop {
        tokio::select! {
            msg = instance.next_message() => match msg {
                Some(args) => {
                    println!("new instance: {:?}", args);
                    if crate::is_quit_request(&args) {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    instance.close_instance();
    Ok(0)
}
